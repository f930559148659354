use crate::queue::SessionQueue;
use async_stream::stream;
use axum::response::sse::Event;
use events::{Channel, Message};
use futures::Stream;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a session (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The peer is gone. This is the normal end of every session, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportClosed;

impl fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transport closed")
    }
}

impl StdError for TransportClosed {}

/// Write half of a client's streaming response. Each `send` is one event.
#[derive(Debug, Clone)]
pub struct Transport {
    sender: mpsc::Sender<Event>,
}

/// Read half of a client's streaming response, handed to the HTTP layer.
#[derive(Debug)]
pub struct TransportReceiver {
    receiver: mpsc::Receiver<Event>,
}

impl Transport {
    /// Creates a transport that buffers at most `capacity` unread events.
    pub fn channel(capacity: usize) -> (Transport, TransportReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Transport { sender }, TransportReceiver { receiver })
    }

    /// Waits for buffer space, then writes `event`. Fails once the receiving
    /// side has been dropped.
    pub async fn send(&self, event: Event) -> Result<(), TransportClosed> {
        self.sender.send(event).await.map_err(|_| TransportClosed)
    }

    /// Resolves when the receiving side has been dropped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl TransportReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Events as a stream for `Sse`, ending once the session has released
    /// its transport.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Event, Infallible>> {
        stream! {
            while let Some(event) = self.receiver.recv().await {
                yield Ok(event);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// One client's attached stream: its channel, its private sequence counter,
/// the transport events are written to, and the queue live messages wait in.
///
/// Owned by the session's controller. The registry only holds the queue.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    channel: Channel,
    sequence: u64,
    state: SessionState,
    transport: Option<Transport>,
    queue: Arc<SessionQueue>,
}

impl Session {
    pub fn new(channel: Channel, transport: Transport, queue_capacity: usize) -> Self {
        Self {
            id: SessionId::new(),
            channel,
            sequence: 0,
            state: SessionState::Active,
            transport: Some(transport),
            queue: Arc::new(SessionQueue::new(queue_capacity)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Id of the last event written, 0 before the first.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queue(&self) -> &Arc<SessionQueue> {
        &self.queue
    }

    /// Waits for the next queued live message; `None` once the queue is closed.
    pub async fn next_message(&self) -> Option<Message> {
        self.queue.recv().await
    }

    pub(crate) fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    /// Only `SessionWriter` advances the sequence.
    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Stops accepting live messages. Deliveries racing with teardown see
    /// the queue closed and report the session as gone.
    pub(crate) fn begin_close(&mut self) {
        self.state = SessionState::Closing;
        self.queue.close();
    }

    /// Releases the transport, which ends the client's response stream.
    pub(crate) fn finish_close(&mut self) {
        self.transport = None;
        self.state = SessionState::Closed;
    }
}
