use crate::auth::{Authorizer, TemplateAction};
use crate::domain::{TemplateDraft, User};
use crate::error::{FieldError, Result, TemplateError};
use crate::reorder::{move_template, MoveDirection};
use crate::resolver::{resolve_index, resolve_pulldown};
use crate::storage::Storage;
use axum::{
    extract::{Path, Query},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Extension, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl IntoResponse for TemplateError {
    fn into_response(self) -> Response {
        let status = match &self {
            TemplateError::NotFound(_) => StatusCode::NOT_FOUND,
            TemplateError::Forbidden(_) => StatusCode::FORBIDDEN,
            TemplateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match self {
            TemplateError::Validation(details) => serde_json::json!({
                "error": "validation failed",
                "details": details,
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Resolves the requesting user from the `x-user-id` header. Identity is
/// explicit per request; there is no ambient current-user state.
async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let raw = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| TemplateError::Forbidden("missing x-user-id header".to_string()))?;
    let user_id = Uuid::parse_str(raw)
        .map_err(|_| TemplateError::Forbidden("malformed x-user-id header".to_string()))?;
    state
        .storage
        .find_user(user_id)
        .await
        .map_err(|_| TemplateError::Forbidden("unknown user".to_string()))
}

async fn authorize(
    state: &AppState,
    user: &User,
    action: TemplateAction,
    project_id: Uuid,
) -> Result<()> {
    if state.authorizer.allowed_to(user.id, action, project_id).await? {
        Ok(())
    } else {
        Err(TemplateError::Forbidden(format!(
            "user {} may not {:?} on project {}",
            user.login, action, project_id
        )))
    }
}

/// Checks the draft, including the storage-backed tracker lookup.
async fn validate_draft(state: &AppState, draft: &TemplateDraft) -> Result<()> {
    let mut errors = draft.field_errors();
    if let Some(tracker_id) = draft.tracker_id {
        if state.storage.find_tracker(tracker_id).await.is_err() {
            errors.push(FieldError::new("tracker_id", "unknown tracker"));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::Validation(errors))
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "issue-templates",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn index(
    Extension(state): Extension<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::ViewTemplates, project_id).await?;
    let view = resolve_index(state.storage.as_ref(), project_id).await?;
    Ok(Json(view).into_response())
}

#[derive(Deserialize)]
struct PulldownQuery {
    tracker_id: Uuid,
}

async fn pulldown(
    Extension(state): Extension<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<PulldownQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::ViewTemplates, project_id).await?;
    let options = resolve_pulldown(state.storage.as_ref(), project_id, query.tracker_id).await?;
    Ok(Json(options).into_response())
}

async fn show(
    Extension(state): Extension<AppState>,
    Path((project_id, template_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::ViewTemplates, project_id).await?;
    let template = state.storage.find_template(template_id).await?;
    if template.project_id != project_id {
        return Err(TemplateError::Forbidden(
            "template belongs to another project".to_string(),
        ));
    }
    Ok(Json(template).into_response())
}

async fn create(
    Extension(state): Extension<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(draft): Json<TemplateDraft>,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::EditTemplates, project_id).await?;
    state.storage.find_project(project_id).await?;
    validate_draft(&state, &draft).await?;

    let mut template = draft.into_template(project_id, user.id);
    state.storage.create_template(&mut template).await?;
    info!("User {} created template '{}'", user.login, template.title);
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

async fn update(
    Extension(state): Extension<AppState>,
    Path((project_id, template_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(draft): Json<TemplateDraft>,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::EditTemplates, project_id).await?;
    let mut template = state.storage.find_template(template_id).await?;
    if template.project_id != project_id {
        return Err(TemplateError::Forbidden(
            "template belongs to another project".to_string(),
        ));
    }
    validate_draft(&state, &draft).await?;

    draft.apply_to(&mut template);
    state.storage.update_template(&template).await?;
    info!("User {} updated template '{}'", user.login, template.title);
    Ok(Json(template).into_response())
}

async fn destroy(
    Extension(state): Extension<AppState>,
    Path((project_id, template_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::EditTemplates, project_id).await?;
    let template = state.storage.find_template(template_id).await?;
    if template.project_id != project_id {
        return Err(TemplateError::Forbidden(
            "template belongs to another project".to_string(),
        ));
    }
    state.storage.delete_template(template_id).await?;
    info!("User {} deleted template '{}'", user.login, template.title);
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
struct MoveRequest {
    to: MoveDirection,
}

async fn move_order(
    Extension(state): Extension<AppState>,
    Path((project_id, template_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(request): Json<MoveRequest>,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::EditTemplates, project_id).await?;
    let template = state.storage.find_template(template_id).await?;
    if template.project_id != project_id {
        return Err(TemplateError::Forbidden(
            "template belongs to another project".to_string(),
        ));
    }
    move_template(state.storage.as_ref(), template_id, request.to).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
struct LoadQuery {
    template_id: Uuid,
    template_type: Option<String>,
}

/// Fetches one template's body for insertion into the issue form. The
/// `template_type=global` discriminator selects the global table.
async fn load(
    Extension(state): Extension<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<LoadQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::ViewTemplates, project_id).await?;

    let body = if query.template_type.as_deref() == Some("global") {
        let template = state.storage.find_global_template(query.template_id).await?;
        serde_json::json!({ "template": template })
    } else {
        let template = state.storage.find_template(query.template_id).await?;
        serde_json::json!({ "template": template })
    };
    Ok(Json(body).into_response())
}

#[derive(Deserialize)]
struct SettingsDraft {
    enabled_inherit_templates: bool,
    should_replaced: bool,
}

async fn update_settings(
    Extension(state): Extension<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(draft): Json<SettingsDraft>,
) -> Result<Response> {
    let user = current_user(&state, &headers).await?;
    authorize(&state, &user, TemplateAction::EditTemplates, project_id).await?;

    let mut setting = state.storage.get_or_create_setting(project_id).await?;
    setting.enabled_inherit_templates = draft.enabled_inherit_templates;
    setting.should_replaced = draft.should_replaced;
    state.storage.save_setting(&setting).await?;
    Ok(Json(setting).into_response())
}

#[derive(Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    description: Option<String>,
}

/// Echoes the description text for client-side preview rendering.
async fn preview(Json(request): Json<PreviewRequest>) -> Response {
    Json(serde_json::json!({ "text": request.description })).into_response()
}

/// Create the HTTP server with all routes
pub fn create_server(storage: Arc<dyn Storage>, authorizer: Arc<dyn Authorizer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let state = AppState { storage, authorizer };

    Router::new()
        .route("/health", get(health))
        .route("/projects/:project_id/templates", get(index).post(create))
        .route("/projects/:project_id/templates/pulldown", get(pulldown))
        .route("/projects/:project_id/templates/load", get(load))
        .route("/projects/:project_id/templates/settings", put(update_settings))
        .route(
            "/projects/:project_id/templates/:template_id",
            get(show).put(update).delete(destroy),
        )
        .route(
            "/projects/:project_id/templates/:template_id/move",
            post(move_order),
        )
        .route("/preview", post(preview))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    storage: Arc<dyn Storage>,
    authorizer: Arc<dyn Authorizer>,
    port: u16,
) -> Result<()> {
    let app = create_server(storage, authorizer);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Template service listening on http://localhost:{port}");
    println!("Template service running on http://localhost:{port}");
    println!("Health check: http://localhost:{port}/health");

    hyper::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
