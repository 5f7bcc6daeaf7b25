//! Manual reordering of templates within their project+tracker scope.
//! Positions are renumbered contiguously from zero after every move.

use crate::error::{Result, TemplateError};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Higher,
    Lower,
    ToTop,
    ToBottom,
}

/// Moves a template within its ordering scope. Moves past the scope
/// boundary (e.g. `Higher` on the first entry) are no-ops.
pub async fn move_template(
    storage: &dyn Storage,
    template_id: Uuid,
    direction: MoveDirection,
) -> Result<()> {
    let template = storage.find_template(template_id).await?;
    let scope = storage
        .templates_in_scope(template.project_id, template.tracker_id)
        .await?;

    let mut order: Vec<Uuid> = scope.iter().filter_map(|t| t.id).collect();
    let index = order
        .iter()
        .position(|id| *id == template_id)
        .ok_or_else(|| {
            TemplateError::Storage(format!("template {template_id} missing from its own scope"))
        })?;

    match direction {
        MoveDirection::Higher => {
            if index > 0 {
                order.swap(index, index - 1);
            }
        }
        MoveDirection::Lower => {
            if index + 1 < order.len() {
                order.swap(index, index + 1);
            }
        }
        MoveDirection::ToTop => {
            let id = order.remove(index);
            order.insert(0, id);
        }
        MoveDirection::ToBottom => {
            let id = order.remove(index);
            order.push(id);
        }
    }

    let updates: Vec<(Uuid, u32)> = order
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position as u32))
        .collect();
    storage.save_positions(&updates).await?;

    debug!(
        "Moved template {} {:?} within a scope of {}",
        template_id,
        direction,
        updates.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Project, Template};
    use crate::storage::InMemoryStorage;
    use chrono::Utc;

    async fn scope_of_four() -> (InMemoryStorage, Uuid, Option<Uuid>, Vec<Uuid>) {
        let storage = InMemoryStorage::new();
        let project = Project {
            id: Uuid::new_v4(),
            name: "Alpha".to_string(),
            identifier: "alpha".to_string(),
            parent_id: None,
            tracker_ids: Vec::new(),
        };
        storage.insert_project(project.clone());
        let tracker = Some(Uuid::new_v4());

        let mut ids = Vec::new();
        for title in ["A", "B", "C", "D"] {
            let now = Utc::now();
            let mut template = Template {
                id: None,
                project_id: project.id,
                tracker_id: tracker,
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
            };
            storage.create_template(&mut template).await.unwrap();
            ids.push(template.id.unwrap());
        }
        (storage, project.id, tracker, ids)
    }

    async fn order(storage: &InMemoryStorage, project_id: Uuid, tracker: Option<Uuid>) -> Vec<Uuid> {
        storage
            .templates_in_scope(project_id, tracker)
            .await
            .unwrap()
            .iter()
            .filter_map(|t| t.id)
            .collect()
    }

    #[tokio::test]
    async fn to_bottom_moves_first_to_last_preserving_relative_order() {
        let (storage, project_id, tracker, ids) = scope_of_four().await;

        move_template(&storage, ids[0], MoveDirection::ToBottom)
            .await
            .unwrap();

        let scope = storage.templates_in_scope(project_id, tracker).await.unwrap();
        let got: Vec<Uuid> = scope.iter().filter_map(|t| t.id).collect();
        assert_eq!(got, vec![ids[1], ids[2], ids[3], ids[0]]);
        let positions: Vec<u32> = scope.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(scope.last().unwrap().position, 3);
    }

    #[tokio::test]
    async fn to_top_moves_last_to_first() {
        let (storage, project_id, tracker, ids) = scope_of_four().await;

        move_template(&storage, ids[3], MoveDirection::ToTop)
            .await
            .unwrap();
        assert_eq!(
            order(&storage, project_id, tracker).await,
            vec![ids[3], ids[0], ids[1], ids[2]]
        );
    }

    #[tokio::test]
    async fn higher_and_lower_swap_adjacent_entries() {
        let (storage, project_id, tracker, ids) = scope_of_four().await;

        move_template(&storage, ids[2], MoveDirection::Higher)
            .await
            .unwrap();
        assert_eq!(
            order(&storage, project_id, tracker).await,
            vec![ids[0], ids[2], ids[1], ids[3]]
        );

        move_template(&storage, ids[2], MoveDirection::Lower)
            .await
            .unwrap();
        assert_eq!(
            order(&storage, project_id, tracker).await,
            vec![ids[0], ids[1], ids[2], ids[3]]
        );
    }

    #[tokio::test]
    async fn higher_on_the_first_entry_is_a_no_op() {
        let (storage, project_id, tracker, ids) = scope_of_four().await;

        move_template(&storage, ids[0], MoveDirection::Higher)
            .await
            .unwrap();
        assert_eq!(order(&storage, project_id, tracker).await, ids);
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let (storage, _, _, _) = scope_of_four().await;
        let err = move_template(&storage, Uuid::new_v4(), MoveDirection::Lower)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[tokio::test]
    async fn moves_do_not_leak_into_other_scopes() {
        let (storage, project_id, tracker, ids) = scope_of_four().await;

        // A template in the unset-tracker scope of the same project
        let now = Utc::now();
        let mut other = Template {
            id: None,
            project_id,
            tracker_id: None,
            title: "Other scope".to_string(),
            description: String::new(),
            note: None,
            position: 0,
            is_default: false,
            enabled: true,
            enabled_sharing: false,
            author_id: None,
            created_at: now,
            updated_at: now,
        };
        storage.create_template(&mut other).await.unwrap();

        move_template(&storage, ids[0], MoveDirection::ToBottom)
            .await
            .unwrap();

        let untouched = storage.templates_in_scope(project_id, None).await.unwrap();
        assert_eq!(untouched.len(), 1);
        assert_eq!(untouched[0].position, 0);
        assert_eq!(order(&storage, project_id, tracker).await.len(), 4);
    }
}
