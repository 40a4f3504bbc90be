//! OpenAPI specification generation for the recorder API.
//!
//! The generated document is served at `/api/openapi.json` and written to disk
//! by the `gen-openapi` binary for client generation.

use axum::Json;
use hrm_core::{
    ConnectionState, DeviceDescriptor, EnvironmentalPayload, RecordEnvelope, RecordKind,
    RecordPayload, RecordRange, RriPayload, SessionStatus,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::records::RecordRequest;
use super::session::{CommandResponse, ConnectRequest};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for the recorder API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Recorder API",
        version = "0.1.0",
        description = r#"
# HRM Recorder API

Client-side session for a heart-rate / RRI recorder with environmental sensors.

## Overview

1. **Session**: Bind a recorder, connect, disconnect. Unexpected link loss is
   retried automatically up to three times with a linearly growing delay.
2. **Records**: Query the stored id range, ask the recorder to send records,
   and follow decoded records live over server-sent events.

## Command semantics

Commands (`sync-clock`, `records/request`) are fire-and-forget. When the
recorder is not connected they are dropped without error; the response's
`delivered` flag says whether a live link existed.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local recorder server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "session", description = "Recorder connection lifecycle"),
        (name = "devices", description = "Recorder discovery"),
        (name = "records", description = "Stored and live records")
    ),
    paths(
        super::health::health_check,
        super::session::get_session,
        super::session::connect,
        super::session::disconnect,
        super::session::sync_clock,
        super::session::discover_device,
        super::records::get_range,
        super::records::request_records,
        super::records::stream_records,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            ConnectRequest,
            CommandResponse,
            RecordRequest,
            SessionStatus,
            ConnectionState,
            DeviceDescriptor,
            RecordRange,
            RecordEnvelope,
            RecordKind,
            RecordPayload,
            RriPayload,
            EnvironmentalPayload,
        )
    )
)]
pub struct ApiDoc;
