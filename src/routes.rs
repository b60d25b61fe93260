use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    collaborators::{
        ClientRoster, InMemoryClientRoster, InMemoryLookbookStore, InMemoryStyleCatalog, InMemoryUsageCounter, LookbookStore,
    },
    error::StudioError,
    gateway::GenerationGateway,
    history::HistoryEntry,
    intake::accept_upload,
    models::{
        BaseStyleRequest, CaptureFailedRequest, ClientRecord, Lookbook, LookbookQuery, ModifierRequest, NewClientRequest,
        NewStyleRequest, PhotoRequest, PromptRequest, SelectClientRequest, StyleDescriptor,
    },
    orchestrator::{ClientChoice, Orchestrator, StudioCollaborators, StudioSnapshot},
    pdf::generate_lookbook_pdf,
    prompts::MODIFIER_CHIPS,
};

type ApiResult<T> = Result<T, StudioError>;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Orchestrator>>>>,
    pub gateway: Arc<dyn GenerationGateway>,
    pub catalog: Arc<InMemoryStyleCatalog>,
    pub roster: Arc<InMemoryClientRoster>,
    pub lookbooks: Arc<InMemoryLookbookStore>,
    pub usage: Arc<InMemoryUsageCounter>,
    pub initial_style_count: usize,
}

impl AppState {
    pub fn new(gateway: Arc<dyn GenerationGateway>, initial_style_count: usize) -> Self {
        Self {
            sessions: Arc::default(),
            gateway,
            catalog: Arc::new(InMemoryStyleCatalog::with_built_in()),
            roster: Arc::default(),
            lookbooks: Arc::default(),
            usage: Arc::default(),
            initial_style_count,
        }
    }

    fn collaborators(&self) -> StudioCollaborators {
        StudioCollaborators {
            gateway: self.gateway.clone(),
            usage: self.usage.clone(),
            lookbooks: self.lookbooks.clone(),
            roster: self.roster.clone(),
            catalog: self.catalog.clone(),
        }
    }

    fn session(&self, id: Uuid) -> ApiResult<Arc<Orchestrator>> {
        self.sessions.read().get(&id).cloned().ok_or_else(|| StudioError::NotFound(format!("studio session {}", id)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/studio", post(create_session))
        .route("/api/studio/:id", get(get_session).delete(close_session))
        .route("/api/studio/:id/client", post(select_client))
        .route("/api/studio/:id/magic-capture", post(open_magic_capture))
        .route("/api/studio/:id/capture-failed", post(capture_failed))
        .route("/api/studio/:id/photo", post(upload_photo))
        .route("/api/studio/:id/base-style", post(select_base_style))
        .route("/api/studio/:id/prompt", axum::routing::put(edit_prompt))
        .route("/api/studio/:id/modifier", post(apply_modifier))
        .route("/api/studio/:id/finalize", post(finalize))
        .route("/api/studio/:id/retry", post(retry))
        .route("/api/studio/:id/reset", post(reset))
        .route("/api/studio/:id/history", get(session_history))
        .route("/api/studio/:id/events", get(session_events))
        .route("/api/styles", get(list_styles).post(add_style))
        .route("/api/modifiers", get(list_modifiers))
        .route("/api/clients", get(list_clients).post(create_client))
        .route("/api/lookbooks", get(list_lookbooks))
        .route("/api/lookbooks/:id", get(get_lookbook))
        .route("/api/lookbooks/:id/pdf", get(export_pdf))
        .route("/api/usage", get(usage))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

// --- Studio sessions ---

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<StudioSnapshot>) {
    let studio = Arc::new(Orchestrator::new(state.collaborators(), state.initial_style_count));
    let snapshot = studio.snapshot();
    state.sessions.write().insert(studio.session_id(), studio);
    tracing::info!("🎬 Opened studio session {}", snapshot.session_id);
    (StatusCode::CREATED, Json(snapshot))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.snapshot()))
}

/// Leaving the studio abandons whatever run was in progress.
pub async fn close_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    let studio = state.sessions.write().remove(&id).ok_or_else(|| StudioError::NotFound(format!("studio session {}", id)))?;
    studio.reset().await?;
    tracing::info!("👋 Closed studio session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn select_client(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SelectClientRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    let choice = match (body.client_id, body.name) {
        (Some(client_id), _) => ClientChoice::Existing(client_id),
        (None, Some(name)) => ClientChoice::New(name),
        (None, None) => return Err(StudioError::BadRequest("either client_id or name is required".into())),
    };
    Ok(Json(state.session(id)?.select_client(choice).await?))
}

pub async fn open_magic_capture(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.open_magic_capture().await?))
}

pub async fn capture_failed(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<CaptureFailedRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.report_capture_failure(body.message).await?))
}

pub async fn upload_photo(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<PhotoRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    let studio = state.session(id)?;
    let image = accept_upload(&body.image_data, body.mime_type.as_deref())?;
    tracing::info!("📸 Photo received for session {} ({}, {} chars)", id, image.mime_type, image.image_data.len());
    Ok(Json(studio.capture_photo(image).await?))
}

pub async fn select_base_style(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<BaseStyleRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.select_base_style(body.index).await?))
}

pub async fn edit_prompt(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<PromptRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.edit_prompt(body.prompt).await?))
}

pub async fn apply_modifier(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ModifierRequest>,
) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.apply_modifier(body.modifier).await?))
}

pub async fn finalize(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.finalize().await?))
}

pub async fn retry(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.retry().await?))
}

pub async fn reset(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<StudioSnapshot>> {
    Ok(Json(state.session(id)?.reset().await?))
}

pub async fn session_history(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.session(id)?.history()))
}

/// Server-sent stream of run signals (celebrate, lookbook persisted, run abandoned).
pub async fn session_events(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Response> {
    let receiver = state.session(id)?.subscribe();
    let signals = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(signal) => return Some((signal, receiver)),
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Event stream for session {} skipped {} signals", id, skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    let sse_stream = signals.map(|signal| {
        let data = serde_json::to_string(&signal).unwrap_or_default();
        Ok::<_, std::io::Error>(format!("event: run\ndata: {}\n\n", data))
    });

    let headers = [(header::CONTENT_TYPE, "text/event-stream"), (header::CACHE_CONTROL, "no-cache")];
    Ok((headers, Body::from_stream(sse_stream)).into_response())
}

// --- Catalog, clients, lookbooks ---

pub async fn list_styles(State(state): State<AppState>) -> Json<Vec<StyleDescriptor>> {
    Json(state.catalog.all_styles())
}

pub async fn add_style(State(state): State<AppState>, Json(body): Json<NewStyleRequest>) -> ApiResult<(StatusCode, Json<StyleDescriptor>)> {
    let style = state.catalog.add_user_style(body)?;
    Ok((StatusCode::CREATED, Json(style)))
}

pub async fn list_modifiers() -> Json<Vec<&'static str>> {
    Json(MODIFIER_CHIPS.to_vec())
}

pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientRecord>> {
    Json(state.roster.list().await)
}

pub async fn create_client(State(state): State<AppState>, Json(body): Json<NewClientRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state.roster.create(&body.name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn list_lookbooks(State(state): State<AppState>, Query(query): Query<LookbookQuery>) -> ApiResult<Json<Vec<Lookbook>>> {
    let client_id = query.client_id.ok_or_else(|| StudioError::BadRequest("client_id query parameter is required".into()))?;
    Ok(Json(state.lookbooks.list_for_client(&client_id).await))
}

pub async fn get_lookbook(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Lookbook>> {
    state.lookbooks.get(id).await.map(Json).ok_or_else(|| StudioError::NotFound(format!("lookbook {}", id)))
}

pub async fn export_pdf(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let lookbook = state.lookbooks.get(id).await.ok_or_else(|| StudioError::NotFound(format!("lookbook {}", id)))?;
    let client_name = state.roster.list().await.into_iter().find(|c| c.id == lookbook.client_id).map(|c| c.name);
    let pdf_bytes = generate_lookbook_pdf(&lookbook, client_name.as_deref()).map_err(StudioError::Export)?;
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"lookbook_{}.pdf\"", id)),
    ];
    Ok((StatusCode::OK, headers, Bytes::from(pdf_bytes)))
}

pub async fn usage(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "generations": state.usage.count() }))
}
