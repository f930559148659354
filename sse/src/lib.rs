//! Server-Sent Events fan-out core.
//!
//! Bridges messages published on external pub/sub channels to any number of
//! long-lived streaming clients, replaying each channel's recent history to a
//! client before its live messages begin.
//!
//! # Architecture
//!
//! - **One upstream subscription per channel**: `ChannelSubscription` keeps a
//!   single supervised subscription per channel no matter how many clients
//!   are attached, reconnecting with exponential backoff and escalating a
//!   `SubscriptionFault` only after retries are exhausted.
//! - **Explicit registry lifecycle**: `FanoutRegistry` indexes the open
//!   sessions of each channel. Sessions are registered when they go live and
//!   deregistered on every exit path, so no reference to a closed client
//!   survives.
//! - **Per-session backpressure**: delivery only enqueues into each
//!   session's bounded `SessionQueue`. A full queue drops its oldest entry, so
//!   one stalled client never delays the others or the subscription task.
//! - **Per-session sequencing**: `SessionWriter` numbers events from 1 for
//!   each client, across replay and live delivery.
//!
//! # Message Flow
//!
//! 1. A client opens `GET /stream/messages`; the web layer calls
//!    `Manager::open_session` and streams the returned `TransportReceiver`.
//! 2. The spawned `StreamSessionController` ensures the channel's subscription
//!    is running, replays `HistoryStore::fetch_recent`, then registers.
//! 3. Each message from the subscription is handed to `FanoutRegistry::deliver`,
//!    which enqueues it for every registered session on that channel.
//! 4. The controller drains its queue through `SessionWriter` until the peer
//!    disconnects or the server shuts down, then runs its single cleanup path.
//!
//! # Modules
//!
//! - `controller`: per-client state machine (Opening, Replaying, Live, Closed)
//! - `manager`: entry point wiring registry, subscriptions, and controllers
//! - `message`: SSE events, preamble, and keep-alive for bridged messages
//! - `queue`: bounded drop-oldest per-session queue
//! - `registry`: channel-indexed registry of live sessions
//! - `session`: session identity, sequence counter, and transport
//! - `subscription`: supervised upstream subscriptions with backoff
//! - `writer`: sequenced event writes for one session

pub mod controller;
pub mod manager;
pub mod message;
pub mod queue;
pub mod registry;
pub mod session;
pub mod subscription;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use controller::{CloseReason, Phase, StreamSessionController};
pub use manager::{Manager, Settings};
pub use queue::SessionQueue;
pub use registry::{Delivery, FanoutRegistry};
pub use session::{Session, SessionId, SessionState, Transport, TransportClosed, TransportReceiver};
pub use subscription::{Backoff, ChannelSubscription, SubscriptionFault};
pub use writer::SessionWriter;
