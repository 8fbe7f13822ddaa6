use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::put;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::ClimateController;
use crate::engine::FanMode;
use crate::engine::SystemMode;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Deserialize)]
struct SetpointRequest {
    value: f64,
}

/// Body for PUT /v1/override. `enabled` toggles override mode; the optional
/// fields push direct state while it is on.
#[derive(Deserialize)]
struct OverrideRequest {
    enabled: bool,

    #[serde(default)]
    system_mode: Option<SystemMode>,

    #[serde(default)]
    fan_mode: Option<FanMode>,

    #[serde(default)]
    heat_setpoint: Option<f64>,

    #[serde(default)]
    cool_setpoint: Option<f64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    controller: ClimateController,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/status
#[tracing::instrument(skip(state))]
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/status request");
    (StatusCode::OK, Json(state.controller.status()))
}

/// Handler for PUT /v1/setpoint
#[tracing::instrument(skip(state, body))]
async fn set_setpoint(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetpointRequest>,
) -> impl IntoResponse {
    tracing::debug!(value = body.value, "Handling /v1/setpoint request");
    state.controller.set_setpoint(body.value).await;
    (StatusCode::OK, Json(state.controller.status()))
}

/// Handler for PUT /v1/override
#[tracing::instrument(skip(state, body))]
async fn set_override(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OverrideRequest>,
) -> axum::response::Response {
    tracing::debug!(enabled = body.enabled, "Handling /v1/override request");

    if !body.enabled {
        state.controller.override_disable().await;
        return (StatusCode::OK, Json(state.controller.status())).into_response();
    }

    state.controller.override_enable().await;
    let result = state
        .controller
        .apply_override(|next| {
            if let Some(mode) = body.system_mode {
                next.system_mode = mode;
            }
            if let Some(mode) = body.fan_mode {
                next.fan_mode = mode;
            }
            if let Some(target) = body.heat_setpoint {
                next.heat_setpoint = Some(target);
            }
            if let Some(target) = body.cool_setpoint {
                next.cool_setpoint = Some(target);
            }
        })
        .await;

    match result {
        Ok(()) => (StatusCode::OK, Json(state.controller.status())).into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/status", get(status))
        .route("/v1/setpoint", put(set_setpoint))
        .route("/v1/override", put(set_override))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves until the provided shutdown
/// signal fires.
pub async fn serve(
    bind: String,
    controller: ClimateController,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        controller,
    });
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
