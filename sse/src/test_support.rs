use crate::session::TransportReceiver;
use axum::body::{to_bytes, Bytes};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use std::convert::Infallible;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// One decoded event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub event: String,
    pub id: u64,
    pub data: String,
}

/// Encodes `event` exactly as an `Sse` response body would.
pub(crate) async fn encode(event: Event) -> Bytes {
    let events = futures::stream::iter([Ok::<_, Infallible>(event)]);
    to_bytes(Sse::new(events).into_response().into_body(), usize::MAX)
        .await
        .unwrap()
}

/// Parses an event frame. Returns `None` for the preamble and comments.
pub(crate) fn parse_frame(bytes: &[u8]) -> Option<Frame> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut event = None;
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("event: ") {
            event = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id: ") {
            id = value.parse().ok();
        } else if let Some(value) = line.strip_prefix("data: ") {
            data.push(value);
        }
    }

    Some(Frame {
        event: event?,
        id: id?,
        data: data.join("\n"),
    })
}

/// Reads until the next message event, skipping the preamble.
/// Panics if none arrives in time or the stream ends.
pub(crate) async fn next_event(receiver: &mut TransportReceiver) -> Frame {
    let read = async {
        loop {
            let event = receiver.recv().await.expect("stream ended before an event");
            if let Some(frame) = parse_frame(&encode(event).await) {
                return frame;
            }
        }
    };
    tokio::time::timeout(WAIT, read)
        .await
        .expect("timed out waiting for an event")
}

/// Waits for the stream to end, discarding anything still buffered.
pub(crate) async fn stream_end(receiver: &mut TransportReceiver) {
    let drain = async { while receiver.recv().await.is_some() {} };
    tokio::time::timeout(WAIT, drain)
        .await
        .expect("timed out waiting for the stream to end")
}

/// Polls `condition` until it holds. Panics after a few seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("condition not reached in time")
}
