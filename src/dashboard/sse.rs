//! Server-sent event stream of a job's output.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::api::{ApiError, ApiPath, SharedState};
use crate::jobs::JobEvent;

fn to_sse(event: JobEvent) -> Event {
    match event {
        JobEvent::Line(line) => Event::default().event("line").data(line),
        JobEvent::Done { status } => Event::default()
            .event("done")
            .data(serde_json::json!({ "status": status }).to_string()),
    }
}

/// `GET /api/jobs/{id}/output`: buffered lines, live lines, then one `done` event.
pub async fn job_output(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.jobs.subscribe(&id)?;
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
