//! Template resolution: given a project, an optional tracker and the
//! project's inheritance setting, assemble the ordered, precedence-ranked
//! candidate list and pick the effective default.
//!
//! Precedence runs own templates first, then ancestor templates (root
//! first, matching the ancestor chain order), then globals. A project-level
//! default always beats an inherited one; globals never supply the default.

use crate::domain::{GlobalTemplate, Template};
use crate::error::Result;
use crate::storage::Storage;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Which group a pulldown entry came from. Rendered distinctly by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceOrigin {
    Own,
    Inherited,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateChoice {
    pub label: String,
    pub id: Uuid,
    pub origin: ChoiceOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DefaultChoice {
    pub id: Uuid,
    pub origin: ChoiceOrigin,
}

/// View model for the template pulldown on the issue form.
#[derive(Debug, Serialize)]
pub struct PulldownOptions {
    pub tracker_id: Uuid,
    pub tracker_name: String,
    pub choices: Vec<TemplateChoice>,
    pub default: Option<DefaultChoice>,
    /// Whether applying a choice should overwrite already-entered text.
    pub should_replaced: bool,
}

/// One tracker's section of the listing view.
#[derive(Debug, Serialize)]
pub struct TrackerGroup {
    pub tracker_id: Uuid,
    pub tracker_name: String,
    pub templates: Vec<Template>,
}

/// View model for the template listing page.
#[derive(Debug, Serialize)]
pub struct TemplateIndex {
    pub groups: Vec<TrackerGroup>,
    pub inherited: Vec<Template>,
    pub globals: Vec<GlobalTemplate>,
    pub inherit_enabled: bool,
}

fn choice(template: &Template, origin: ChoiceOrigin) -> Option<TemplateChoice> {
    template.id.map(|id| TemplateChoice {
        label: template.title.clone(),
        id,
        origin,
    })
}

/// Resolves the pulldown for a single (project, tracker) pair.
pub async fn resolve_pulldown(
    storage: &dyn Storage,
    project_id: Uuid,
    tracker_id: Uuid,
) -> Result<PulldownOptions> {
    storage.find_project(project_id).await?;
    let tracker = storage.find_tracker(tracker_id).await?;
    let setting = storage.get_or_create_setting(project_id).await?;

    let mut choices = Vec::new();
    let mut default = None;

    let primary = storage
        .templates_by_project_and_tracker(project_id, Some(tracker_id))
        .await?;
    for template in &primary {
        // Ordered fetch, so the first flagged entry is the lowest-position one
        if default.is_none() && template.is_default {
            default = template.id.map(|id| DefaultChoice {
                id,
                origin: ChoiceOrigin::Own,
            });
        }
        choices.extend(choice(template, ChoiceOrigin::Own));
    }
    let has_project_default = default.is_some();

    if setting.enabled_inherit_templates {
        for ancestor in storage.ancestors(project_id).await? {
            let inherited = storage
                .shared_inheritable_templates(ancestor.id, Some(tracker_id))
                .await?;
            for template in &inherited {
                if !has_project_default && default.is_none() && template.is_default {
                    default = template.id.map(|id| DefaultChoice {
                        id,
                        origin: ChoiceOrigin::Inherited,
                    });
                }
                choices.extend(choice(template, ChoiceOrigin::Inherited));
            }
        }
    }

    // Globals round out the list but never participate in default selection
    let globals = storage
        .global_templates_for_project(project_id, Some(tracker_id))
        .await?;
    for template in &globals {
        if let Some(id) = template.id {
            choices.push(TemplateChoice {
                label: template.title.clone(),
                id,
                origin: ChoiceOrigin::Global,
            });
        }
    }

    debug!(
        "Resolved pulldown for project {} tracker {}: {} choices",
        project_id,
        tracker.name,
        choices.len()
    );

    Ok(PulldownOptions {
        tracker_id,
        tracker_name: tracker.name,
        choices,
        default,
        should_replaced: setting.should_replaced,
    })
}

/// Resolves the listing view: own templates grouped per tracker in use,
/// plus a flat de-duplicated inherited list and the project's globals.
pub async fn resolve_index(storage: &dyn Storage, project_id: Uuid) -> Result<TemplateIndex> {
    let project = storage.find_project(project_id).await?;
    let setting = storage.get_or_create_setting(project_id).await?;

    let mut groups = Vec::new();
    for tracker_id in storage.tracker_ids_in_use(project_id).await? {
        let tracker = storage.find_tracker(tracker_id).await?;
        let templates = storage
            .templates_by_project_and_tracker(project_id, Some(tracker_id))
            .await?;
        if !templates.is_empty() {
            groups.push(TrackerGroup {
                tracker_id,
                tracker_name: tracker.name,
                templates,
            });
        }
    }

    // Inherited templates are shown flat, filtered to the trackers the
    // project has enabled, ancestor order preserved
    let mut inherited = Vec::new();
    if setting.enabled_inherit_templates {
        let enabled_trackers: HashSet<Uuid> = project.tracker_ids.iter().copied().collect();
        let mut seen = HashSet::new();
        for ancestor in storage.ancestors(project_id).await? {
            for template in storage
                .shared_inheritable_templates(ancestor.id, None)
                .await?
            {
                let applies = template
                    .tracker_id
                    .map_or(true, |id| enabled_trackers.contains(&id));
                if applies && template.id.map_or(false, |id| seen.insert(id)) {
                    inherited.push(template);
                }
            }
        }
    }

    let globals = storage.global_templates_for_project(project_id, None).await?;

    Ok(TemplateIndex {
        groups,
        inherited,
        globals,
        inherit_enabled: setting.enabled_inherit_templates,
    })
}
