use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use faas_common::{FaasError, FunctionEntry, SandboxExecutor};
use faas_store::MetadataStore;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod upload;

use config::ServerConfig;
use dispatcher::Dispatcher;
use error::ApiError;
use upload::Upload;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: MetadataStore,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: MetadataStore,
        executor: Arc<dyn SandboxExecutor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(Dispatcher::new(store.clone(), executor)),
            store,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/upload", post(upload_handler))
        .route("/functions", get(list_functions_handler))
        .route("/wasm/:id", any(invoke_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    let upload = Upload::from_multipart(&mut multipart).await?;
    upload::register_function(&state.store, &state.config.modules_dir, &upload).await?;
    Ok(StatusCode::OK)
}

async fn list_functions_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<FunctionEntry>>, ApiError> {
    // Any failure while listing is this request's problem only.
    let list = async {
        let mut tx = state.store.begin().await?;
        let functions = tx.list_functions().await?;
        tx.commit().await?;
        Ok::<_, faas_store::StoreError>(functions)
    };

    list.await
        .map(Json)
        .map_err(|e| ApiError::Faas(FaasError::Store(e.to_string())))
}

async fn invoke_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let function_id: i64 = id.parse().map_err(|_| ApiError::InvalidFunctionId)?;
    let response = state
        .dispatcher
        .invoke(function_id, method.as_str(), body.to_vec())
        .await?;
    Ok(response.into_response())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
