//! HTTP surface: routes, handlers and the startup hook that loads the model.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinHandle};

use crate::engine::{EngineRequest, EngineState, InferenceEngine};
use crate::error::{DecodeError, Error, InferenceError, LoadError, panic_message};
use crate::model::ModelLoader;
use crate::preprocess;
use crate::state::{AppState, ServiceStatus, StatusSnapshot, unix_timestamp};

/// Room for multipart boundaries and the text field on top of the image itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub model_loaded: bool,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub engine: Option<EngineState>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub response: String,
    pub timestamp: f64,
}

/// Request-level failures and their HTTP rendering.
#[derive(Debug)]
pub enum ApiError {
    NotReady,
    InvalidForm(String),
    Processing(Error),
    Internal(String),
}

impl ApiError {
    fn details(&self) -> String {
        match self {
            ApiError::NotReady => "Model not loaded".to_string(),
            ApiError::InvalidForm(msg) | ApiError::Internal(msg) => msg.clone(),
            ApiError::Processing(e) => e.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Processing(e)
    }
}

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        ApiError::Processing(e.into())
    }
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        ApiError::Processing(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "Model not loaded" }),
            ),
            ApiError::InvalidForm(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request", "details": details }),
            ),
            ApiError::Processing(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to process request", "details": self.details() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.snapshot();
    Json(HealthResponse {
        status: snapshot.status,
        model_loaded: snapshot.model_loaded,
        timestamp: unix_timestamp(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        snapshot: StatusSnapshot::clone(&state.snapshot()),
        engine: state.engine().map(InferenceEngine::state),
    })
}

struct ProcessForm {
    text: String,
    image: Bytes,
}

/// Hitting the body limit is an oversized image, like any other upload over `max_bytes`.
fn form_error(e: MultipartError, max_bytes: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DecodeError::UploadTooLarge { max: max_bytes }.into()
    } else {
        ApiError::InvalidForm(e.body_text())
    }
}

async fn read_form(mut multipart: Multipart, max_bytes: usize) -> Result<ProcessForm, ApiError> {
    let mut text = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, max_bytes))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("text") => {
                text = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| form_error(e, max_bytes))?,
                );
            }
            Some("image") => {
                image = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| form_error(e, max_bytes))?,
                );
            }
            other => log::debug!("Ignoring form field {other:?}"),
        }
    }

    let text = text.ok_or_else(|| ApiError::InvalidForm("missing form field `text`".into()))?;
    if text.trim().is_empty() {
        return Err(ApiError::InvalidForm("form field `text` is empty".into()));
    }

    Ok(ProcessForm {
        text,
        image: image.ok_or_else(|| ApiError::InvalidForm("missing form field `image`".into()))?,
    })
}

async fn process(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let Some(engine) = state.engine() else {
        log::debug!("Rejecting request: model not loaded");
        return Err(ApiError::NotReady);
    };

    let count = state.record_request();
    let result = run_process(&state, engine, multipart).await;

    match &result {
        Ok(_) => log::info!("Request {count} completed"),
        Err(e) => {
            log::error!("Error processing request {count}: {}", e.details());
            state.record_failure(e.details());
        }
    }
    result
}

async fn run_process(
    state: &AppState,
    engine: &InferenceEngine,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let max_bytes = state.config.max_upload_bytes;
    let multipart = multipart.map_err(|e| ApiError::InvalidForm(e.body_text()))?;
    let form = read_form(multipart, max_bytes).await?;

    log::info!("Processing request: {}", form.text);

    let max_size = state.config.max_image_size;
    let image = tokio::task::spawn_blocking(move || {
        preprocess::decode_image(&form.image, max_bytes).map(|img| preprocess::normalize(img, max_size))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("image preprocessing aborted: {e}")))??;

    let output = engine
        .infer(EngineRequest {
            text: form.text,
            image,
            params: state.config.sampling.clone(),
        })
        .await?;

    log::debug!(
        "Request {} generated {} chars in {:?}",
        output.id,
        output.response.len(),
        output.duration
    );

    Ok(Json(ProcessResponse {
        response: output.response,
        timestamp: unix_timestamp(),
    }))
}

/// Builds the service router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/process", post(process))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Startup hook: loads the model in the background and installs it when done.
///
/// The status moves `initializing -> loading_model -> ready`, or to `error` if
/// loading fails, in which case it stays there until the process restarts.
pub fn spawn_model_load<L>(state: Arc<AppState>, loader: L) -> JoinHandle<()>
where
    L: ModelLoader + Send + 'static,
{
    tokio::spawn(async move {
        log::info!("Starting application and loading model...");
        state.set_loading();

        let spec = state.config.model_spec();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&spec))
            .await
            .unwrap_or_else(|e| {
                let message = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                Err(LoadError::Panicked(message))
            });

        match loaded {
            Ok(loaded) => {
                let device = loaded.device;
                let engine = InferenceEngine::new(loaded.model, device);
                if state.install_engine(engine).is_err() {
                    log::warn!("A model was already installed, discarding the new one");
                    return;
                }
                log::info!(
                    "Model loaded successfully on {} ({:?})",
                    device.device,
                    device.precision
                );
            }
            Err(e) => {
                log::error!("Failed to load model: {e}");
                state.set_load_failed(e.to_string());
            }
        }
    })
}

/// Serves the router on `listener` until Ctrl+C.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {e}");
            }
            log::info!("Shutting down");
        })
        .await
}
