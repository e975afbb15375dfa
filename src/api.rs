use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    error::{error_response, PipelineError},
    ingest,
    models::{ActionItem, Answer, ComparisonResult, ReferenceEntry},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ComparePayload {
    session_id: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    session_id: String,
    question: String,
}

#[derive(Deserialize)]
pub struct ActionablePayload {
    issue: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Completed,
    NoMatch,
    Failed,
}

/// Respuesta de la subida de un SOP, que encadena la comparación con la FDA.
#[derive(Serialize)]
pub struct SopUploadResponse {
    upload_status: &'static str,
    session_id: String,
    chunks: usize,
    comparison_status: ComparisonStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison: Option<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison_message: Option<String>,
}

#[derive(Serialize)]
pub struct ReferenceUploadResponse {
    message: String,
    label: String,
    chunks: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    status: Status,
    sessions: u64,
    reference_backend: &'static str,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route("/api/sop/upload", post(upload_sop_handler))
        .route("/api/sop/compare", post(compare_handler))
        .route("/api/sop/ask", post(ask_handler))
        .route("/api/sop/actionable", post(actionable_handler))
        .route("/api/sop/:session_id", delete(delete_session_handler))
        .route("/api/reference/upload", post(upload_reference_handler))
        .route("/api/reference/:label", get(reference_entries_handler))
        .route("/api/fda/check", post(fda_check_handler))
        .route("/api/status", get(status_handler))
        .route("/api/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Handlers ---

/// Sube un SOP, construye el índice de la sesión y lanza la comparación.
/// Si la comparación falla la subida se da igualmente por buena.
#[axum::debug_handler]
async fn upload_sop_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SopUploadResponse>, ApiError> {
    let form = read_upload(multipart).await.map_err(fail)?;
    let session_id = form
        .field("session_id")
        .ok_or_else(|| fail(PipelineError::BadRequest("Session ID is required".into())))?;
    let (filename, bytes) = form
        .file
        .ok_or_else(|| fail(PipelineError::BadRequest("No file part in the request".into())))?;

    let text = ingest::extract_text(bytes, &filename).await.map_err(fail)?;
    let chunks = ingest::chunk_text(&state.sop_chunker, &text);
    if chunks.is_empty() {
        return Err(fail(PipelineError::ExtractionFailed(format!(
            "{filename}: ningún párrafo supera el mínimo de caracteres"
        ))));
    }

    let chunk_count = state.sessions.build(&session_id, chunks).await.map_err(fail)?;
    info!("SOP '{filename}' subido a la sesión '{session_id}' ({chunk_count} chunks).");

    let (comparison_status, comparison, comparison_message) =
        match state.comparator.compare_sop_to_reference(&session_id).await {
            Ok(result) => (ComparisonStatus::Completed, Some(result), None),
            Err(err) if err.is_soft() => (ComparisonStatus::NoMatch, None, Some(err.to_string())),
            Err(err) => {
                error!("Comparación fallida para la sesión '{session_id}': {err}");
                (ComparisonStatus::Failed, None, Some(err.to_string()))
            }
        };

    Ok(Json(SopUploadResponse {
        upload_status: "success",
        session_id,
        chunks: chunk_count,
        comparison_status,
        comparison,
        comparison_message,
    }))
}

#[axum::debug_handler]
async fn compare_handler(
    State(state): State<AppState>,
    Json(payload): Json<ComparePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = required(&payload.session_id, "Session ID is required")?;
    match state.comparator.compare_sop_to_reference(session_id).await {
        Ok(result) => Ok(Json(json!(result))),
        Err(err) if err.is_soft() => Ok(Json(json!({ "answer": err.to_string() }))),
        Err(err) => Err(fail(err)),
    }
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<Answer>, ApiError> {
    let session_id = required(&payload.session_id, "Session ID is required")?;
    let question = required(&payload.question, "Question is required")?;
    state
        .comparator
        .answer_question(session_id, question)
        .await
        .map(Json)
        .map_err(fail)
}

#[axum::debug_handler]
async fn actionable_handler(
    State(state): State<AppState>,
    Json(payload): Json<ActionablePayload>,
) -> Result<Json<ActionItem>, ApiError> {
    let issue = required(&payload.issue, "No issue provided")?;
    state.comparator.make_actionable(issue).await.map(Json).map_err(fail)
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(fail(PipelineError::SessionNotFound(session_id)))
    }
}

/// Sube un documento de referencia (guía FDA) al índice compartido.
#[axum::debug_handler]
async fn upload_reference_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ReferenceUploadResponse>, ApiError> {
    let form = read_upload(multipart).await.map_err(fail)?;
    let label_field = form.field("label");
    let (filename, bytes) = form
        .file
        .ok_or_else(|| fail(PipelineError::BadRequest("No file part in the request".into())))?;
    let label = label_field.unwrap_or_else(|| filename.clone());
    let source_label = format!("user_{label}");

    let busy = state.busy(format!("Indexando '{filename}' como '{source_label}'..."));
    let result = state.reference.ingest(bytes, &filename, &source_label).await;
    match result {
        Ok(summary) => {
            busy.finish(format!("¡Indexación completada! {summary}"));
            Ok(Json(ReferenceUploadResponse {
                message: format!("Uploaded {} chunks from '{label}'.", summary.chunks_created),
                label: source_label,
                chunks: summary.chunks_created,
            }))
        }
        Err(err) => {
            busy.finish(format!("Error en la indexación: {err}"));
            Err(fail(err))
        }
    }
}

#[axum::debug_handler]
async fn reference_entries_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Json<Vec<ReferenceEntry>>, ApiError> {
    state.reference.entries_by_label(&label).await.map(Json).map_err(fail)
}

#[axum::debug_handler]
async fn fda_check_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let busy = state.busy("Comprobando la página de la FDA...");
    let outcome = state.fda_watcher.check_once().await;
    match outcome {
        Ok(outcome) => {
            busy.finish("Comprobación de la FDA completada.");
            Ok(Json(outcome))
        }
        Err(err) => {
            error!("Error en la comprobación de la FDA: {err:#}");
            busy.finish(format!("Error en la comprobación de la FDA: {err}"));
            Err((StatusCode::BAD_GATEWAY, Json(json!({ "error": format!("{err:#}") }))))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.status_snapshot(),
        sessions: state.sessions.len().await,
        reference_backend: state.config.reference_backend.as_str(),
    })
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.reference.health_check().await.map_err(fail)?;
    Ok(Json(json!({ "status": "ok", "reference_backend": state.config.reference_backend.as_str() })))
}

// --- Utilidades ---

/// Registra el error y lo convierte en respuesta HTTP.
fn fail(err: PipelineError) -> ApiError {
    if err.status_code().is_server_error() {
        error!("Error procesando la petición: {err}");
    }
    error_response(err)
}

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        Err(fail(PipelineError::BadRequest(message.to_string())))
    } else {
        Ok(value)
    }
}

/// Formulario multipart con un fichero y campos de texto.
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    fields: Vec<(String, String)>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(k, v)| k == name && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, PipelineError> {
    let mut form = UploadForm { file: None, fields: Vec::new() };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::BadRequest(format!("Multipart inválido: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            if filename.is_empty() {
                return Err(PipelineError::BadRequest("No file selected".into()));
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PipelineError::BadRequest(format!("No se pudo leer el fichero: {e}")))?;
            form.file = Some((filename, bytes.to_vec()));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| PipelineError::BadRequest(format!("Campo '{name}' inválido: {e}")))?;
            form.fields.push((name, value));
        }
    }
    Ok(form)
}
