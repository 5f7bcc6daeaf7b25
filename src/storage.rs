use crate::auth::{Authorizer, TemplateAction};
use crate::domain::{GlobalTemplate, Project, Template, TemplateSetting, Tracker, User};
use crate::error::{Result, TemplateError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Storage boundary for template data. All list-returning operations come
/// back ordered by ascending `position`, ties broken by insertion order.
///
/// A `tracker_id` of `Some(t)` filters to candidates for that tracker, which
/// includes templates whose own tracker is unset; `None` applies no tracker
/// filter.
#[async_trait]
pub trait Storage: Send + Sync {
    // Lookups
    async fn find_project(&self, project_id: Uuid) -> Result<Project>;
    async fn find_tracker(&self, tracker_id: Uuid) -> Result<Tracker>;
    async fn find_user(&self, user_id: Uuid) -> Result<User>;
    async fn find_template(&self, template_id: Uuid) -> Result<Template>;
    async fn find_global_template(&self, template_id: Uuid) -> Result<GlobalTemplate>;

    /// Ancestor chain of a project, root first.
    async fn ancestors(&self, project_id: Uuid) -> Result<Vec<Project>>;

    /// Distinct tracker ids referenced by the project's enabled templates,
    /// in tracker display order.
    async fn tracker_ids_in_use(&self, project_id: Uuid) -> Result<Vec<Uuid>>;

    // Template operations
    async fn create_template(&self, template: &mut Template) -> Result<()>;
    async fn update_template(&self, template: &Template) -> Result<()>;
    async fn delete_template(&self, template_id: Uuid) -> Result<()>;

    /// Enabled templates of the project, filtered to tracker candidates.
    async fn templates_by_project_and_tracker(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>>;

    /// Enabled templates of the project that are shared with descendants.
    async fn shared_inheritable_templates(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>>;

    /// Enabled global templates associated with the project.
    async fn global_templates_for_project(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<GlobalTemplate>>;

    /// Per-project settings, created with defaults on first access. Must be
    /// idempotent: concurrent callers observe one settings row.
    async fn get_or_create_setting(&self, project_id: Uuid) -> Result<TemplateSetting>;

    /// Persists a settings change (inheritance toggle, replace behavior).
    async fn save_setting(&self, setting: &TemplateSetting) -> Result<()>;

    /// Every template in the exact project+tracker ordering scope, enabled
    /// or not. Unlike the candidate queries, the tracker here matches
    /// exactly: the unset-tracker scope is its own ordering group.
    async fn templates_in_scope(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>>;

    /// Persists a batch of position updates produced by a reorder.
    async fn save_positions(&self, updates: &[(Uuid, u32)]) -> Result<()>;
}

#[derive(Clone)]
struct TemplateRow {
    seq: u64,
    template: Template,
}

#[derive(Clone)]
struct GlobalRow {
    seq: u64,
    template: GlobalTemplate,
}

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    trackers: HashMap<Uuid, Tracker>,
    users: HashMap<Uuid, User>,
    templates: HashMap<Uuid, TemplateRow>,
    globals: HashMap<Uuid, GlobalRow>,
    settings: HashMap<Uuid, TemplateSetting>,
    grants: HashMap<(Uuid, Uuid), HashSet<TemplateAction>>,
    next_seq: u64,
}

impl Tables {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn ordered_templates<F>(&self, filter: F) -> Vec<Template>
    where
        F: Fn(&Template) -> bool,
    {
        let mut rows: Vec<&TemplateRow> = self
            .templates
            .values()
            .filter(|row| filter(&row.template))
            .collect();
        rows.sort_by_key(|row| (row.template.position, row.seq));
        rows.iter().map(|row| row.template.clone()).collect()
    }

    // Whether a template scoped to `own` is a candidate for `requested`.
    fn tracker_matches(own: Option<Uuid>, requested: Option<Uuid>) -> bool {
        match requested {
            Some(tracker_id) => own.is_none() || own == Some(tracker_id),
            None => true,
        }
    }
}

/// In-memory storage implementation for development/testing. A single lock
/// over the tables gives the find-or-create and renumbering steps the
/// atomicity the real deployment delegates to the relational store.
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    pub fn insert_project(&self, project: Project) {
        let mut tables = self.tables.lock().unwrap();
        tables.projects.insert(project.id, project);
    }

    pub fn insert_tracker(&self, tracker: Tracker) {
        let mut tables = self.tables.lock().unwrap();
        tables.trackers.insert(tracker.id, tracker);
    }

    pub fn insert_user(&self, user: User) {
        let mut tables = self.tables.lock().unwrap();
        tables.users.insert(user.id, user);
    }

    pub fn insert_global_template(&self, template: &mut GlobalTemplate) {
        let mut tables = self.tables.lock().unwrap();
        let id = Uuid::new_v4();
        template.id = Some(id);
        let seq = tables.bump_seq();
        tables.globals.insert(
            id,
            GlobalRow {
                seq,
                template: template.clone(),
            },
        );
    }

    pub fn grant(&self, user_id: Uuid, project_id: Uuid, action: TemplateAction) {
        let mut tables = self.tables.lock().unwrap();
        tables
            .grants
            .entry((user_id, project_id))
            .or_default()
            .insert(action);
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_project(&self, project_id: Uuid) -> Result<Project> {
        let tables = self.tables.lock().unwrap();
        tables
            .projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| TemplateError::not_found("project", project_id))
    }

    async fn find_tracker(&self, tracker_id: Uuid) -> Result<Tracker> {
        let tables = self.tables.lock().unwrap();
        tables
            .trackers
            .get(&tracker_id)
            .cloned()
            .ok_or_else(|| TemplateError::not_found("tracker", tracker_id))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<User> {
        let tables = self.tables.lock().unwrap();
        tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| TemplateError::not_found("user", user_id))
    }

    async fn find_template(&self, template_id: Uuid) -> Result<Template> {
        let tables = self.tables.lock().unwrap();
        tables
            .templates
            .get(&template_id)
            .map(|row| row.template.clone())
            .ok_or_else(|| TemplateError::not_found("template", template_id))
    }

    async fn find_global_template(&self, template_id: Uuid) -> Result<GlobalTemplate> {
        let tables = self.tables.lock().unwrap();
        tables
            .globals
            .get(&template_id)
            .map(|row| row.template.clone())
            .ok_or_else(|| TemplateError::not_found("global template", template_id))
    }

    async fn ancestors(&self, project_id: Uuid) -> Result<Vec<Project>> {
        let tables = self.tables.lock().unwrap();
        if !tables.projects.contains_key(&project_id) {
            return Err(TemplateError::not_found("project", project_id));
        }

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(project_id);
        let mut current = tables.projects.get(&project_id).and_then(|p| p.parent_id);
        while let Some(parent_id) = current {
            // Guard against a malformed cyclic hierarchy
            if !visited.insert(parent_id) {
                break;
            }
            match tables.projects.get(&parent_id) {
                Some(parent) => {
                    current = parent.parent_id;
                    chain.push(parent.clone());
                }
                None => break,
            }
        }
        // Walked child-to-parent; callers expect root first
        chain.reverse();
        Ok(chain)
    }

    async fn tracker_ids_in_use(&self, project_id: Uuid) -> Result<Vec<Uuid>> {
        let tables = self.tables.lock().unwrap();
        let referenced: HashSet<Uuid> = tables
            .templates
            .values()
            .filter(|row| row.template.project_id == project_id && row.template.enabled)
            .filter_map(|row| row.template.tracker_id)
            .collect();

        let mut trackers: Vec<&Tracker> = tables
            .trackers
            .values()
            .filter(|t| referenced.contains(&t.id))
            .collect();
        trackers.sort_by(|a, b| (a.position, &a.name).cmp(&(b.position, &b.name)));
        Ok(trackers.iter().map(|t| t.id).collect())
    }

    async fn create_template(&self, template: &mut Template) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let id = Uuid::new_v4();
        template.id = Some(id);

        // Append to the bottom of its ordering scope
        let scope_len = tables
            .templates
            .values()
            .filter(|row| {
                row.template.project_id == template.project_id
                    && row.template.tracker_id == template.tracker_id
            })
            .count();
        template.position = scope_len as u32;

        let seq = tables.bump_seq();
        tables.templates.insert(
            id,
            TemplateRow {
                seq,
                template: template.clone(),
            },
        );

        debug!("Created template: {} with id {}", template.title, id);
        Ok(())
    }

    async fn update_template(&self, template: &Template) -> Result<()> {
        let template_id = template.id.ok_or_else(|| {
            TemplateError::Storage("Cannot update template without ID".to_string())
        })?;

        let mut tables = self.tables.lock().unwrap();
        match tables.templates.get_mut(&template_id) {
            Some(row) => {
                row.template = template.clone();
                debug!("Updated template: {} with id {}", template.title, template_id);
                Ok(())
            }
            None => Err(TemplateError::not_found("template", template_id)),
        }
    }

    async fn delete_template(&self, template_id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let removed = tables
            .templates
            .remove(&template_id)
            .ok_or_else(|| TemplateError::not_found("template", template_id))?;

        // Close the position gap left in the scope
        let scope = (removed.template.project_id, removed.template.tracker_id);
        for row in tables.templates.values_mut() {
            if (row.template.project_id, row.template.tracker_id) == scope
                && row.template.position > removed.template.position
            {
                row.template.position -= 1;
            }
        }

        debug!("Deleted template {}", template_id);
        Ok(())
    }

    async fn templates_by_project_and_tracker(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.ordered_templates(|t| {
            t.project_id == project_id
                && t.enabled
                && Tables::tracker_matches(t.tracker_id, tracker_id)
        }))
    }

    async fn shared_inheritable_templates(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.ordered_templates(|t| {
            t.project_id == project_id
                && t.enabled
                && t.enabled_sharing
                && Tables::tracker_matches(t.tracker_id, tracker_id)
        }))
    }

    async fn global_templates_for_project(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<GlobalTemplate>> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<&GlobalRow> = tables
            .globals
            .values()
            .filter(|row| {
                row.template.enabled
                    && row.template.project_ids.contains(&project_id)
                    && Tables::tracker_matches(row.template.tracker_id, tracker_id)
            })
            .collect();
        rows.sort_by_key(|row| (row.template.position, row.seq));
        Ok(rows.iter().map(|row| row.template.clone()).collect())
    }

    async fn get_or_create_setting(&self, project_id: Uuid) -> Result<TemplateSetting> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.projects.contains_key(&project_id) {
            return Err(TemplateError::not_found("project", project_id));
        }
        let setting = tables
            .settings
            .entry(project_id)
            .or_insert_with(|| TemplateSetting::defaults(project_id));
        Ok(setting.clone())
    }

    async fn save_setting(&self, setting: &TemplateSetting) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.projects.contains_key(&setting.project_id) {
            return Err(TemplateError::not_found("project", setting.project_id));
        }
        tables.settings.insert(setting.project_id, setting.clone());
        Ok(())
    }

    async fn templates_in_scope(
        &self,
        project_id: Uuid,
        tracker_id: Option<Uuid>,
    ) -> Result<Vec<Template>> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<&TemplateRow> = tables
            .templates
            .values()
            .filter(|row| {
                row.template.project_id == project_id && row.template.tracker_id == tracker_id
            })
            .collect();
        rows.sort_by_key(|row| (row.template.position, row.seq));
        Ok(rows.iter().map(|row| row.template.clone()).collect())
    }

    async fn save_positions(&self, updates: &[(Uuid, u32)]) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        for (template_id, position) in updates {
            match tables.templates.get_mut(template_id) {
                Some(row) => row.template.position = *position,
                None => return Err(TemplateError::not_found("template", *template_id)),
            }
        }
        debug!("Saved {} position updates", updates.len());
        Ok(())
    }
}

#[async_trait]
impl Authorizer for InMemoryStorage {
    async fn allowed_to(
        &self,
        user_id: Uuid,
        action: TemplateAction,
        project_id: Uuid,
    ) -> Result<bool> {
        let tables = self.tables.lock().unwrap();
        let user = tables
            .users
            .get(&user_id)
            .ok_or_else(|| TemplateError::not_found("user", user_id))?;
        if user.admin {
            return Ok(true);
        }
        Ok(tables
            .grants
            .get(&(user_id, project_id))
            .map(|actions| actions.contains(&action))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(parent_id: Option<Uuid>) -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "Test Project".to_string(),
            identifier: "test-project".to_string(),
            parent_id,
            tracker_ids: Vec::new(),
        }
    }

    fn template(project_id: Uuid, tracker_id: Option<Uuid>, title: &str) -> Template {
        let now = Utc::now();
        Template {
            id: None,
            project_id,
            tracker_id,
            title: title.to_string(),
            description: String::new(),
            note: None,
            position: 0,
            is_default: false,
            enabled: true,
            enabled_sharing: false,
            author_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn settings_find_or_create_is_idempotent() {
        let storage = InMemoryStorage::new();
        let p = project(None);
        storage.insert_project(p.clone());

        let first = storage.get_or_create_setting(p.id).await.unwrap();
        let second = storage.get_or_create_setting(p.id).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.enabled_inherit_templates);
        assert!(first.should_replaced);
    }

    #[tokio::test]
    async fn settings_creation_survives_concurrent_callers() {
        let storage = Arc::new(InMemoryStorage::new());
        let p = project(None);
        storage.insert_project(p.clone());

        let a = tokio::spawn({
            let storage = storage.clone();
            async move { storage.get_or_create_setting(p.id).await.unwrap() }
        });
        let b = tokio::spawn({
            let storage = storage.clone();
            async move { storage.get_or_create_setting(p.id).await.unwrap() }
        });
        assert_eq!(a.await.unwrap(), b.await.unwrap());
    }

    #[tokio::test]
    async fn settings_for_unknown_project_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.get_or_create_setting(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_appends_to_the_bottom_of_its_scope() {
        let storage = InMemoryStorage::new();
        let p = project(None);
        storage.insert_project(p.clone());
        let tracker = Uuid::new_v4();

        let mut first = template(p.id, Some(tracker), "First");
        let mut second = template(p.id, Some(tracker), "Second");
        let mut other_scope = template(p.id, None, "Other scope");
        storage.create_template(&mut first).await.unwrap();
        storage.create_template(&mut second).await.unwrap();
        storage.create_template(&mut other_scope).await.unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(other_scope.position, 0);
    }

    #[tokio::test]
    async fn candidate_query_includes_unset_tracker_templates() {
        let storage = InMemoryStorage::new();
        let p = project(None);
        storage.insert_project(p.clone());
        let bug = Uuid::new_v4();
        let feature = Uuid::new_v4();

        let mut any = template(p.id, None, "Any tracker");
        let mut bug_only = template(p.id, Some(bug), "Bug only");
        let mut feature_only = template(p.id, Some(feature), "Feature only");
        let mut disabled = template(p.id, Some(bug), "Disabled");
        disabled.enabled = false;
        storage.create_template(&mut any).await.unwrap();
        storage.create_template(&mut bug_only).await.unwrap();
        storage.create_template(&mut feature_only).await.unwrap();
        storage.create_template(&mut disabled).await.unwrap();

        let candidates = storage
            .templates_by_project_and_tracker(p.id, Some(bug))
            .await
            .unwrap();
        let titles: Vec<&str> = candidates.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Any tracker", "Bug only"]);
    }

    #[tokio::test]
    async fn delete_closes_the_position_gap() {
        let storage = InMemoryStorage::new();
        let p = project(None);
        storage.insert_project(p.clone());
        let tracker = Uuid::new_v4();

        let mut a = template(p.id, Some(tracker), "A");
        let mut b = template(p.id, Some(tracker), "B");
        let mut c = template(p.id, Some(tracker), "C");
        storage.create_template(&mut a).await.unwrap();
        storage.create_template(&mut b).await.unwrap();
        storage.create_template(&mut c).await.unwrap();

        storage.delete_template(b.id.unwrap()).await.unwrap();
        let scope = storage.templates_in_scope(p.id, Some(tracker)).await.unwrap();
        let order: Vec<(&str, u32)> = scope.iter().map(|t| (t.title.as_str(), t.position)).collect();
        assert_eq!(order, vec![("A", 0), ("C", 1)]);
    }

    #[tokio::test]
    async fn ancestors_are_returned_root_first() {
        let storage = InMemoryStorage::new();
        let root = project(None);
        let mid = project(Some(root.id));
        let leaf = project(Some(mid.id));
        storage.insert_project(root.clone());
        storage.insert_project(mid.clone());
        storage.insert_project(leaf.clone());

        let chain = storage.ancestors(leaf.id).await.unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![root.id, mid.id]);
    }

    #[tokio::test]
    async fn admin_passes_every_authorization_check() {
        let storage = InMemoryStorage::new();
        let p = project(None);
        storage.insert_project(p.clone());
        let admin = User {
            id: Uuid::new_v4(),
            login: "admin".to_string(),
            admin: true,
        };
        let member = User {
            id: Uuid::new_v4(),
            login: "member".to_string(),
            admin: false,
        };
        storage.insert_user(admin.clone());
        storage.insert_user(member.clone());
        storage.grant(member.id, p.id, TemplateAction::ViewTemplates);

        assert!(storage
            .allowed_to(admin.id, TemplateAction::EditTemplates, p.id)
            .await
            .unwrap());
        assert!(storage
            .allowed_to(member.id, TemplateAction::ViewTemplates, p.id)
            .await
            .unwrap());
        assert!(!storage
            .allowed_to(member.id, TemplateAction::EditTemplates, p.id)
            .await
            .unwrap());
    }
}
