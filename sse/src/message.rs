//! `text/event-stream` events for bridged messages.
//!
//! Every bridged message becomes one event:
//!
//! ```text
//! event: <channel>
//! id: <sequence>
//! data: <payload line>
//!
//! ```

use axum::response::sse::{Event, KeepAlive};
use std::borrow::Cow;
use std::time::Duration;

/// Comment text of the frame sent on idle streams.
pub const KEEP_ALIVE_TEXT: &str = "keep-alive";

/// Builds the event for one message. A payload containing line breaks
/// (`\n`, `\r\n` or `\r`) is split over consecutive `data:` lines, which
/// clients join back with `\n`.
pub fn event(channel: &str, id: u64, payload: &str) -> Event {
    Event::default()
        .event(channel)
        .id(id.to_string())
        .data(normalize_line_breaks(payload))
}

/// An empty event, written once when a stream opens. Encodes as a single
/// blank line.
pub fn preamble() -> Event {
    Event::default()
}

/// `: keep-alive` comments every `interval` while the stream is idle.
pub fn keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text(KEEP_ALIVE_TEXT)
}

fn normalize_line_breaks(payload: &str) -> Cow<'_, str> {
    if payload.contains('\r') {
        Cow::Owned(payload.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(payload)
    }
}
