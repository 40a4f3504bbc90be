//! Recorder session endpoints.
//!
//! Connection lifecycle and device selection. Commands written while the
//! recorder is not connected are dropped, so command endpoints report whether
//! a live link existed when they were issued.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use hrm_core::{ConnectionState, DeviceDescriptor, SessionStatus};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Connect request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device": { "id": "C4:7F:51:12:34:56", "name": "HRM-REC" }
}))]
pub struct ConnectRequest {
    /// Recorder to bind. Omit to reconnect the bound recorder.
    #[serde(default)]
    pub device: Option<DeviceDescriptor>,
}

/// Outcome of a fire-and-forget command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "delivered": true,
    "connection": { "state": "connected" }
}))]
pub struct CommandResponse {
    /// Whether a live link existed when the command was issued.
    #[schema(example = true)]
    pub delivered: bool,

    /// Connection state at the time of the command.
    pub connection: ConnectionState,
}

impl CommandResponse {
    pub(crate) const fn from_state(connection: ConnectionState) -> Self {
        Self {
            delivered: connection.is_connected(),
            connection,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the session router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_session))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/sync-clock", post(sync_clock))
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the session status.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get recorder session status",
    description = "Returns the connection state, the bound recorder, its firmware \
        revision and the number of automatic reconnect attempts spent since the \
        last confirmed connection.",
    responses(
        (status = 200, description = "Session status", body = SessionStatus)
    )
)]
pub async fn get_session(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session().status().await)
}

/// Connect to a recorder.
#[utoipa::path(
    post,
    path = "/api/session/connect",
    tag = "session",
    operation_id = "connect",
    summary = "Connect to a recorder",
    description = "Binds the given recorder (or reuses the bound one) and establishes \
        a link. Any live link is replaced and pending reconnects are cancelled. \
        On success the device clock is synced and record notifications are armed.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connected", body = SessionStatus),
        (status = 409, description = "No recorder given and none bound", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Link could not be established", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<SessionStatus>> {
    state.session().connect(request.device).await?;
    Ok(Json(state.session().status().await))
}

/// Disconnect from the recorder.
#[utoipa::path(
    post,
    path = "/api/session/disconnect",
    tag = "session",
    operation_id = "disconnect",
    summary = "Disconnect and unbind the recorder",
    description = "Tears down the link, unbinds the recorder and cancels any pending \
        automatic reconnect. Safe to call in any state.",
    responses(
        (status = 200, description = "Disconnected", body = SessionStatus)
    )
)]
pub async fn disconnect(State(state): State<AppState>) -> Json<SessionStatus> {
    state.session().disconnect().await;
    info!("session disconnected via API");
    Json(state.session().status().await)
}

/// Sync the recorder clock.
#[utoipa::path(
    post,
    path = "/api/session/sync-clock",
    tag = "session",
    operation_id = "syncClock",
    summary = "Set the recorder clock to now",
    description = "Writes the current POSIX time to the recorder. Dropped silently \
        when not connected; check `delivered`.",
    responses(
        (status = 200, description = "Command issued", body = CommandResponse),
        (status = 502, description = "Write failed on a live link", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn sync_clock(State(state): State<AppState>) -> ApiResult<Json<CommandResponse>> {
    let connection = state.session().state();
    state.session().sync_clock().await?;
    Ok(Json(CommandResponse::from_state(connection)))
}

/// Discover a recorder.
#[utoipa::path(
    get,
    path = "/api/devices/discover",
    tag = "devices",
    operation_id = "discoverDevice",
    summary = "Discover a recorder",
    description = "Scans for a recorder advertising the recorder service. The result \
        is not bound; pass it to `POST /api/session/connect`.",
    responses(
        (status = 200, description = "Recorder found", body = DeviceDescriptor),
        (status = 404, description = "No recorder found before the discovery timeout", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn discover_device(State(state): State<AppState>) -> ApiResult<Json<DeviceDescriptor>> {
    Ok(Json(state.session().request_device().await?))
}
