//! Message types and external collaborator contracts for the stream bridge.
//!
//! This crate defines what flows through the bridge and the two seams it
//! depends on, without depending on any concrete backend.
//!
//! # Architecture
//!
//! - **Channel**: validated name of a distribution topic, shared by the
//!   pub/sub subscription and the recent-history list.
//! - **Message**: an opaque payload received on a channel.
//! - **HistoryStore**: read access to the externally maintained list of
//!   recent messages for a channel, presented oldest-first.
//! - **MessageSource**: a publish/subscribe primitive keyed by channel name.
//!
//! Redis implementations of both traits live in the `store` crate. The
//! in-memory implementations in [`memory`] back the tests of every layer above.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod error;
pub mod memory;

pub use error::{Error, ErrorKind, SubscriptionErrorKind};
pub use memory::{MemoryHistoryStore, MemorySource};

/// Name of a distribution topic. Written verbatim into the `event:` line of
/// every streamed event and used as-is for the upstream subscription, so it
/// must be non-empty, free of line breaks, and carry no surrounding
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(Arc<str>);

impl Channel {
    pub fn new(name: impl AsRef<str>) -> Result<Self, Error> {
        let name = name.as_ref();
        if name.is_empty() || name.contains(['\r', '\n']) || name.trim() != name {
            return Err(Error::invalid_channel(name));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the recent-history list for this channel, e.g. `alerts-recent`.
    pub fn history_key(&self, suffix: &str) -> String {
        format!("{}{}", self.0, suffix)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::new(s)
    }
}

/// A message received on a channel. The payload is opaque to the bridge and
/// cheap to clone so that fan-out does not copy it per recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    channel: Channel,
    payload: Arc<str>,
}

impl Message {
    pub fn new(channel: Channel, payload: impl Into<Arc<str>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Converts a history list in the store's natural newest-first order into
/// replay order (oldest-first).
pub fn oldest_first<I>(channel: &Channel, newest_first: I) -> Vec<Message>
where
    I: IntoIterator,
    I::IntoIter: DoubleEndedIterator,
    I::Item: Into<Arc<str>>,
{
    newest_first
        .into_iter()
        .rev()
        .map(|payload| Message::new(channel.clone(), payload))
        .collect()
}

/// Read-only access to the bounded list of recent messages for a channel.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns the most recent messages for `channel`, oldest-first.
    /// Fails with [`ErrorKind::StoreUnavailable`] when the backing store
    /// cannot be reached.
    async fn fetch_recent(&self, channel: &Channel) -> Result<Vec<Message>, Error>;
}

/// Live messages for one channel. The stream ending means the underlying
/// subscription connection was lost.
pub type MessageStream = BoxStream<'static, Message>;

/// A publish/subscribe primitive keyed by channel name.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Opens a subscription to `channel`. Fails with a
    /// [`ErrorKind::Subscription`] error when the source cannot be reached.
    async fn subscribe(&self, channel: &Channel) -> Result<MessageStream, Error>;
}
