//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `session` - Connection lifecycle, clock sync and device discovery
//! - `records` - Record range, record requests and the live record stream
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod records;
pub mod session;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                  - Health check
/// /api
/// ├── /session             - Status, connect, disconnect, sync-clock
/// ├── /devices/discover    - Recorder discovery
/// ├── /records             - Range, request, live stream (SSE)
/// └── /openapi.json        - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/devices/discover", get(session::discover_device))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/session", session::router())
                .nest("/records", records::router()),
        )
        .with_state(state)
}
