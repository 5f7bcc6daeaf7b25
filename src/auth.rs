use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actions a user can be granted on a project's templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateAction {
    ViewTemplates,
    EditTemplates,
}

/// Authorization boundary. Consulted by the HTTP layer before any resolver
/// or mutation call; admins pass every check.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn allowed_to(
        &self,
        user_id: Uuid,
        action: TemplateAction,
        project_id: Uuid,
    ) -> Result<bool>;
}
