//! HTTP surface of the pergola controller.
//!
//! # Endpoints
//!
//! - `GET /` and `GET /ws` - WebSocket session (see [`crate::websocket`])
//! - `GET /api/status` - Current state snapshot
//!
//! # Example
//!
//! ```no_run
//! use pergola_controller::{create_router, AppState, BroadcastHub, Config, Controller};
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let config = Config::default();
//! let hub = BroadcastHub::new();
//! let (hardware, _commands) = mpsc::channel(16);
//! let (controller, handle) = Controller::from_config(&config, hub.clone(), hardware);
//! let (_frames, frames_rx) = mpsc::channel(16);
//! tokio::spawn(controller.run(frames_rx));
//!
//! let router = create_router(AppState::new(handle, hub));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::broadcast::BroadcastHub;
use crate::command::CommandRouter;
use crate::controller::ControllerHandle;
use crate::error::PergolaError;
use crate::state::StateSnapshot;
use crate::websocket::ws_handler;

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for HTTP and WebSocket handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the controller task.
    pub controller: ControllerHandle,
    /// Session registry.
    pub hub: BroadcastHub,
    /// Command router shared by all sessions.
    pub router: CommandRouter,
}

impl AppState {
    /// Creates the handler state around a running controller.
    #[must_use]
    pub fn new(controller: ControllerHandle, hub: BroadcastHub) -> Self {
        Self {
            router: CommandRouter::new(controller.clone()),
            controller,
            hub,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The controller task is not running.
    Unavailable(String),
}

impl From<PergolaError> for ApiError {
    fn from(e: PergolaError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router.
///
/// The WebSocket endpoint is mounted at both `/` and `/ws`. CORS is wide
/// open so a dashboard served from elsewhere can poll the status endpoint.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new().route("/status", get(handle_status));

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/status`.
async fn handle_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StateSnapshot>, ApiError> {
    let snapshot = state.controller.snapshot().await.map_err(|e| {
        warn!("Status request failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(snapshot))
}
