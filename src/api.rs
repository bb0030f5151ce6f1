use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    errors::ValidationError,
    models::{GradingRequest, MindMapNode, ModelEssayBand, Persona, Question, ScoreBand},
    workflow::{
        NavigationError, SessionState, SubmitError, View, WorkflowController, BUSY_NOTICE,
        GRADING_FAILED_NOTICE,
    },
};

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    topic: String,
    #[serde(default)]
    answer_text: Option<String>,
    /// Base64; se tolera el prefijo `data:image/...;base64,` del navegador.
    #[serde(default)]
    answer_image: Option<String>,
    #[serde(default)]
    persona: Persona,
}

#[derive(Deserialize)]
pub struct NavigatePayload {
    view: View,
}

#[derive(Deserialize)]
pub struct MindMapPayload {
    topic: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapResponse {
    mind_map: Option<MindMapNode>,
}

/// Instantánea de la sesión tal como la consume el frontend.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    id: Uuid,
    #[serde(flatten)]
    state: SessionState,
    practice_questions: Vec<Question>,
    score_band: Option<ScoreBand>,
    essay_band: Option<ModelEssayBand>,
}

impl SessionView {
    fn of(controller: &WorkflowController) -> Self {
        let state = controller.snapshot();
        let score_band = state.report.as_ref().map(|r| r.score_band());
        let essay_band = state.report.as_ref().map(|r| r.essay_band());
        Self {
            id: controller.id(),
            practice_questions: controller.practice_questions(),
            state,
            score_band,
            essay_band,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    ready: bool,
    model: String,
    practice_provider: &'static str,
    sessions: usize,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    // Las fotos de manuscritos en base64 superan el límite de 2 MB de axum.
    let upload_limit = DefaultBodyLimit::max(app_state.config.max_upload_bytes);
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route(
            "/api/sessions/:id/submit",
            post(submit_handler).layer(upload_limit),
        )
        .route("/api/sessions/:id/navigate", post(navigate_handler))
        .route("/api/sessions/:id/mind-map", post(mind_map_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

fn find_session(state: &AppState, id: Uuid) -> Result<WorkflowController, ApiError> {
    state
        .session(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Sesión no encontrada."))
}

/// Decodifica la imagen enviada por el navegador. Vacía equivale a ausente.
fn decode_image(data: &str) -> Result<Option<Vec<u8>>, ValidationError> {
    let data = data.trim();
    let payload = match data.strip_prefix("data:") {
        Some(uri) => uri.split_once(',').map(|(_, b64)| b64).unwrap_or(""),
        None => data,
    };
    if payload.is_empty() {
        return Ok(None);
    }
    general_purpose::STANDARD
        .decode(payload)
        .map(Some)
        .map_err(|e| ValidationError::InvalidImage(e.to_string()))
}

impl SubmitPayload {
    fn into_request(self) -> Result<GradingRequest, ValidationError> {
        let answer_image = match self.answer_image.as_deref() {
            Some(data) => decode_image(data)?,
            None => None,
        };
        Ok(GradingRequest {
            topic: self.topic,
            answer_text: self.answer_text,
            answer_image,
            persona: self.persona,
        })
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        ready: state.config.gemini_api_key.is_some(),
        model: state.model.model_name().to_string(),
        practice_provider: state.services.practice.kind().as_str(),
        sessions: state.session_count(),
    })
}

#[axum::debug_handler]
async fn create_session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.create_session();
    info!(session = %controller.id(), "Sesión creada");
    (StatusCode::CREATED, Json(SessionView::of(&controller)))
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let controller = find_session(&state, id)?;
    Ok(Json(SessionView::of(&controller)))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.remove_session(id) {
        info!(session = %id, "Sesión descartada");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "Sesión no encontrada."))
    }
}

#[axum::debug_handler]
async fn submit_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Json<SessionView>, ApiError> {
    let controller = find_session(&state, id)?;

    let outcome = match payload.into_request() {
        Ok(request) => controller.submit(request).await,
        Err(e) => Err(controller.reject(e)),
    };

    match outcome {
        Ok(()) => Ok(Json(SessionView::of(&controller))),
        Err(SubmitError::Busy) => Err(api_error(StatusCode::CONFLICT, BUSY_NOTICE)),
        Err(SubmitError::Invalid(e)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.notice(), "session": SessionView::of(&controller) })),
        )),
        Err(SubmitError::Failed(e)) => {
            warn!(session = %id, error = %e, "Corrección fallida");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": GRADING_FAILED_NOTICE, "session": SessionView::of(&controller) })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn navigate_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NavigatePayload>,
) -> Result<Json<SessionView>, ApiError> {
    let controller = find_session(&state, id)?;
    match controller.navigate(payload.view) {
        Ok(()) => Ok(Json(SessionView::of(&controller))),
        Err(NavigationError::ReportUnavailable) => Err(api_error(
            StatusCode::CONFLICT,
            "Todavía no hay ningún informe disponible.",
        )),
    }
}

#[axum::debug_handler]
async fn mind_map_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MindMapPayload>,
) -> Result<Json<MindMapResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let mind_map = controller.generate_mind_map(&payload.topic).await;
    Ok(Json(MindMapResponse { mind_map }))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
