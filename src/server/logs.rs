//! SSE log streaming for refresh runs.
//!
//! Each line carries its sequence id as the SSE event id; clients reconnect
//! with `?since=N` and receive the gap from the ring buffer before going
//! live. Heartbeats keep proxies from closing idle streams.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::refresh::logbuffer::LogLine;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogStreamParams {
    #[serde(default)]
    pub since: Option<u64>,
}

fn to_event(line: &LogLine) -> Event {
    Event::default().id(line.seq.to_string()).data(line.line.clone())
}

/// `GET /api/logs/stream`
pub async fn logs_stream(
    State(state): State<AppState>,
    Query(params): Query<LogStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let buffer = state.runner().logs().clone();

    // Subscribe before snapshotting so nothing falls between replay and live
    let rx = buffer.subscribe();
    let backlog = buffer.since(params.since.unwrap_or(0));
    let replayed_through = backlog.last().map(|l| l.seq).unwrap_or(0);

    let replay = stream::iter(
        backlog
            .iter()
            .map(|line| Ok::<_, Infallible>(to_event(line)))
            .collect::<Vec<_>>(),
    );

    let live = stream::unfold(
        (rx, replayed_through),
        |(mut rx, watermark)| async move {
            loop {
                match rx.recv().await {
                    Ok(line) => {
                        // Drop lines the replay already delivered
                        if line.seq <= watermark {
                            continue;
                        }
                        return Some((Ok::<_, Infallible>(to_event(&line)), (rx, watermark)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "sse client lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    Sse::new(replay.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
