mod http;
mod import;
mod metrics;
mod models;
mod security;
mod wait;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use import::{FormError, ImportClient, ImportConfig, ImportError, PlanTripForm, UploadImportRequest};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, WatchRequest};
use security::{AgentContext, AuthState, require_agent_auth};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use wait::{RegistryError, WaitConfig, WaitRegistry, WaitSnapshot};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "travelone.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let auth_state = AuthState::from_env();
    let client = ImportClient::new(ImportConfig::from_env());
    let registry = WaitRegistry::new(
        Arc::new(client.clone()),
        WaitConfig::from_env(),
        wait::registry::retention_from_env(),
    );
    let _reaper = registry.spawn_reaper(Duration::from_secs(60));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        client,
        registry,
        prometheus_handle: Some(prometheus_handle),
    };
    let app = build_router(state, auth_state)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "travelone.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    client: ImportClient,
    registry: WaitRegistry,
    prometheus_handle: Option<PrometheusHandle>,
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/imports", get(list_imports))
        .route("/imports/plan", post(submit_plan))
        .route("/imports/upload", post(submit_upload))
        .route("/imports/watch", post(watch_import))
        .route("/imports/{token}", get(get_import).delete(cancel_import))
        .route_layer(middleware::from_fn_with_state(auth_state, require_agent_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "travelone-import-rs",
        "watching": state.registry.len().await,
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    match &state.prometheus_handle {
        Some(handle) => (
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Submit the "Plan Your Trip" wizard and start waiting for the tour.
///
/// - Method: `POST`
/// - Path: `/imports/plan`
/// - Body: `PlanTripForm`
/// - Response: `202` with the wait snapshot
async fn submit_plan(
    State(state): State<AppState>,
    Extension(agent): Extension<AgentContext>,
    Json(form): Json<PlanTripForm>,
) -> Result<(StatusCode, Json<WaitSnapshot>), AppError> {
    crate::metrics::inc_requests("/imports/plan");
    form.validate()?;
    let token = state.client.generate_tour(agent.agent_id, &form).await?;
    let snapshot = state.registry.start(&token).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Submit an uploaded document for import and start waiting for the tour.
///
/// - Method: `POST`
/// - Path: `/imports/upload`
/// - Body: `{ file_path, custom_prompt }`
/// - Response: `202` with the wait snapshot
async fn submit_upload(
    State(state): State<AppState>,
    Extension(agent): Extension<AgentContext>,
    Json(request): Json<UploadImportRequest>,
) -> Result<(StatusCode, Json<WaitSnapshot>), AppError> {
    crate::metrics::inc_requests("/imports/upload");
    request.validate()?;
    let token = state.client.upload_file(agent.agent_id, &request).await?;
    let snapshot = state.registry.start(&token).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Wait on a token issued earlier, e.g. after a dashboard reload.
async fn watch_import(
    State(state): State<AppState>,
    Json(request): Json<WatchRequest>,
) -> Result<(StatusCode, Json<WaitSnapshot>), AppError> {
    crate::metrics::inc_requests("/imports/watch");
    let snapshot = state.registry.start(&request.token).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn get_import(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<WaitSnapshot>, AppError> {
    state
        .registry
        .snapshot(&token)
        .await
        .map(Json)
        .ok_or(AppError::NotWatched(token))
}

async fn cancel_import(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<WaitSnapshot>, AppError> {
    crate::metrics::inc_requests("/imports/cancel");
    state
        .registry
        .cancel(&token)
        .await
        .map(Json)
        .ok_or(AppError::NotWatched(token))
}

async fn list_imports(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/imports");
    let imports = state.client.list_imports().await?;
    Ok(Json(json!({ "imports": imports })))
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("import `{0}` is not being watched")]
    NotWatched(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match &self {
            AppError::Form(err) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(err.step.as_str(), err.message),
            ),
            AppError::Import(ImportError::Rejected(message)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("import_rejected", message.clone()),
            ),
            AppError::Import(err) => {
                warn!(target = "travelone.api", error = %err, "import pipeline unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError::new("upstream_unavailable", err.to_string()),
                )
            }
            AppError::Registry(err) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("invalid_token", err.to_string()),
            ),
            AppError::NotWatched(_) => (
                StatusCode::NOT_FOUND,
                ApiError::new("not_found", self.to_string()),
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
