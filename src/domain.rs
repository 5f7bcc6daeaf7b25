use crate::error::FieldError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reusable issue description owned by a single project.
///
/// `tracker_id = None` means the template applies to every tracker.
/// `position` defines the manual display order within the project+tracker
/// scope; `enabled_sharing` controls visibility to descendant projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Option<Uuid>,
    pub project_id: Uuid,
    pub tracker_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub note: Option<String>,
    pub position: u32,
    pub is_default: bool,
    pub enabled: bool,
    pub enabled_sharing: bool,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A template not owned by any project, explicitly associated with the
/// projects it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalTemplate {
    pub id: Option<Uuid>,
    pub tracker_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub note: Option<String>,
    pub position: u32,
    pub enabled: bool,
    pub project_ids: Vec<Uuid>,
    pub author_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A project in the hierarchy. `tracker_ids` are the trackers the project
/// has enabled, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub identifier: String,
    pub parent_id: Option<Uuid>,
    pub tracker_ids: Vec<Uuid>,
}

/// A categorical work item type (bug, feature, ...) used to scope templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracker {
    pub id: Uuid,
    pub name: String,
    pub position: u32,
}

/// Per-project template behavior, created lazily with defaults on first use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateSetting {
    pub project_id: Uuid,
    pub enabled_inherit_templates: bool,
    pub should_replaced: bool,
}

impl TemplateSetting {
    pub fn defaults(project_id: Uuid) -> Self {
        Self {
            project_id,
            enabled_inherit_templates: false,
            should_replaced: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub admin: bool,
}

/// Incoming attributes for creating or updating a template.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tracker_id: Option<Uuid>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub enabled_sharing: bool,
}

fn default_enabled() -> bool {
    true
}

impl TemplateDraft {
    /// Field-level checks that need no storage access. Tracker existence is
    /// verified by the caller, which can look the tracker up.
    pub fn field_errors(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "must not be blank"));
        }
        errors
    }

    /// Materializes a new template from the draft. Position is assigned by
    /// storage on insert.
    pub fn into_template(self, project_id: Uuid, author_id: Uuid) -> Template {
        let now = Utc::now();
        Template {
            id: None,
            project_id,
            tracker_id: self.tracker_id,
            title: self.title,
            description: self.description,
            note: self.note,
            position: 0,
            is_default: self.is_default,
            enabled: self.enabled,
            enabled_sharing: self.enabled_sharing,
            author_id: Some(author_id),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies the draft on top of an existing template, keeping identity,
    /// position and authorship.
    pub fn apply_to(self, template: &mut Template) {
        template.tracker_id = self.tracker_id;
        template.title = self.title;
        template.description = self.description;
        template.note = self.note;
        template.is_default = self.is_default;
        template.enabled = self.enabled;
        template.enabled_sharing = self.enabled_sharing;
        template.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_title_is_a_field_error() {
        let draft = TemplateDraft {
            title: "   ".to_string(),
            description: String::new(),
            note: None,
            tracker_id: None,
            is_default: false,
            enabled: true,
            enabled_sharing: false,
        };
        let errors = draft.field_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "title");
    }

    #[test]
    fn apply_to_keeps_identity_and_position() {
        let project = Uuid::new_v4();
        let author = Uuid::new_v4();
        let draft = TemplateDraft {
            title: "Crash report".to_string(),
            description: "Steps to reproduce:".to_string(),
            note: None,
            tracker_id: None,
            is_default: false,
            enabled: true,
            enabled_sharing: false,
        };
        let mut template = draft.clone().into_template(project, author);
        template.id = Some(Uuid::new_v4());
        template.position = 3;

        let update = TemplateDraft {
            title: "Crash report (updated)".to_string(),
            ..draft
        };
        let id = template.id;
        update.apply_to(&mut template);
        assert_eq!(template.id, id);
        assert_eq!(template.position, 3);
        assert_eq!(template.title, "Crash report (updated)");
        assert_eq!(template.author_id, Some(author));
    }
}
