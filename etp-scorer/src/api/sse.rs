//! GET /events - pipeline lifecycle events over SSE

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    etp_common::sse::pipeline_event_stream(&state.event_bus, "etp-scorer")
}
