use crate::message;
use crate::session::{Session, TransportClosed};
use axum::response::sse::Event;
use events::Message;

/// Writes events to a session's transport.
pub struct SessionWriter;

impl SessionWriter {
    /// Advances the session's sequence and writes `message` as one event
    /// carrying the new value as its id.
    ///
    /// `TransportClosed` means the client went away; the caller tears the
    /// session down.
    pub async fn write(session: &mut Session, message: &Message) -> Result<(), TransportClosed> {
        let id = session.next_sequence();
        let event = message::event(message.channel().as_str(), id, message.payload());
        Self::send(session, event).await
    }

    /// Opens the stream; does not count as an event.
    pub async fn write_preamble(session: &Session) -> Result<(), TransportClosed> {
        Self::send(session, message::preamble()).await
    }

    async fn send(session: &Session, event: Event) -> Result<(), TransportClosed> {
        match session.transport() {
            Some(transport) => transport.send(event).await,
            None => Err(TransportClosed),
        }
    }
}
