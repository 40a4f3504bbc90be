//! Record endpoints.
//!
//! Range queries, record requests and the live record stream. Requested
//! records arrive asynchronously as notifications and show up on the stream,
//! not in the request response.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use hrm_core::{RecordRange, SinkEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::api::session::CommandResponse;
use crate::state::AppState;

/// Keep-alive comment interval on the record stream.
const STREAM_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Record request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "id": 100, "count": 20 }))]
pub struct RecordRequest {
    /// First record id to send.
    #[schema(example = 100)]
    pub id: u32,

    /// Number of records to send.
    #[schema(example = 20, minimum = 1)]
    pub count: u16,
}

/// Creates the records router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/range", get(get_range))
        .route("/request", post(request_records))
        .route("/stream", get(stream_records))
}

/// Query the stored record range.
#[utoipa::path(
    get,
    path = "/api/records/range",
    tag = "records",
    operation_id = "getRecordRange",
    summary = "Read the stored record id range",
    description = "Reads the record status characteristic. The range is a snapshot; \
        the recorder keeps writing records after the read.",
    responses(
        (status = 200, description = "Current range", body = RecordRange),
        (status = 409, description = "Recorder not connected", body = crate::api::error::ErrorResponse),
        (status = 422, description = "Status value too short", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_range(State(state): State<AppState>) -> ApiResult<Json<RecordRange>> {
    Ok(Json(state.session().query_record_range().await?))
}

/// Ask the recorder to send records.
#[utoipa::path(
    post,
    path = "/api/records/request",
    tag = "records",
    operation_id = "requestRecords",
    summary = "Request stored records",
    description = "Asks the recorder to notify `count` records starting at `id`. \
        Records are delivered on `GET /api/records/stream`. Dropped silently when \
        not connected; check `delivered`.",
    request_body = RecordRequest,
    responses(
        (status = 200, description = "Command issued", body = CommandResponse),
        (status = 400, description = "Invalid count", body = crate::api::error::ErrorResponse),
        (status = 502, description = "Write failed on a live link", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn request_records(
    State(state): State<AppState>,
    Json(request): Json<RecordRequest>,
) -> ApiResult<Json<CommandResponse>> {
    if request.count == 0 {
        return Err(ApiError::BadRequest {
            error_code: "invalid_count".to_string(),
            message: "count must be at least 1".to_string(),
        });
    }

    let connection = state.session().state();
    state
        .session()
        .request_records(request.id, request.count)
        .await?;
    Ok(Json(CommandResponse::from_state(connection)))
}

/// Stream decoded records as server-sent events.
///
/// Event names are `record` and `range`; data is the JSON-encoded value.
#[utoipa::path(
    get,
    path = "/api/records/stream",
    tag = "records",
    operation_id = "streamRecords",
    summary = "Live record stream",
    description = "Server-sent events. Each decoded notification is sent as a `record` \
        event carrying a `RecordEnvelope`; each range query as a `range` event. \
        Slow consumers skip events rather than stall the recorder.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream")
    )
)]
pub async fn stream_records(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.records().subscribe();
    Sse::new(events(rx)).keep_alive(KeepAlive::new().interval(STREAM_KEEP_ALIVE))
}

fn events(rx: broadcast::Receiver<SinkEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match to_sse(&event) {
                    Some(sse) => return Some((Ok(sse), rx)),
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "record stream subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("record feed closed");
                    return None;
                }
            }
        }
    })
}

fn to_sse(event: &SinkEvent) -> Option<Event> {
    let encoded = match event {
        SinkEvent::Record(record) => Event::default()
            .event("record")
            .id(record.id.to_string())
            .json_data(record),
        SinkEvent::Range(range) => Event::default().event("range").json_data(range),
    };
    match encoded {
        Ok(sse) => Some(sse),
        Err(err) => {
            warn!(error = %err, "failed to encode record event");
            None
        }
    }
}
