//! In-memory implementations of [`HistoryStore`] and [`MessageSource`].
//!
//! Both mirror the behavior of the Redis backend closely enough to drive the
//! bridge end to end without a server: the history list is kept in the
//! store's natural newest-first order and reversed on read, and a dropped
//! source connection ends the subscriber's stream.

use crate::{oldest_first, Channel, Error, HistoryStore, Message, MessageSource, MessageStream};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use log::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

const SOURCE_BUFFER: usize = 1024;

/// Recent-history lists keyed by channel.
pub struct MemoryHistoryStore {
    lists: DashMap<Channel, VecDeque<String>>,
    retention: Option<usize>,
    available: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
            retention: None,
            available: AtomicBool::new(true),
        }
    }

    /// Keep at most `retention` entries per channel, discarding the oldest.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Record a payload as the newest entry for `channel`.
    pub fn push(&self, channel: &Channel, payload: impl Into<String>) {
        let mut list = self.lists.entry(channel.clone()).or_default();
        list.push_front(payload.into());
        if let Some(retention) = self.retention {
            list.truncate(retention);
        }
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn fetch_recent(&self, channel: &Channel) -> Result<Vec<Message>, Error> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("memory history store is offline"));
        }

        let newest_first: Vec<String> = self
            .lists
            .get(channel)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default();

        Ok(oldest_first(channel, newest_first))
    }
}

/// A broadcast-backed pub/sub source.
pub struct MemorySource {
    senders: DashMap<Channel, broadcast::Sender<String>>,
    available: AtomicBool,
    failures_remaining: AtomicUsize,
    subscribe_attempts: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
            available: AtomicBool::new(true),
            failures_remaining: AtomicUsize::new(0),
            subscribe_attempts: AtomicUsize::new(0),
        }
    }

    /// Publish `payload` on `channel`, returning the number of subscribers
    /// that will receive it.
    pub fn publish(&self, channel: &Channel, payload: impl Into<String>) -> usize {
        match self.senders.get(channel) {
            Some(sender) => sender.send(payload.into()).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of open subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.senders
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Total number of `subscribe` calls, successful or not.
    pub fn subscribe_attempts(&self) -> usize {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Drop every open subscription on `channel`, as a lost connection would.
    pub fn disconnect(&self, channel: &Channel) {
        self.senders.remove(channel);
    }

    /// Make the next `count` subscribe attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every subscribe attempt fail until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn subscribe(&self, channel: &Channel) -> Result<MessageStream, Error> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) || self.take_failure() {
            return Err(Error::connect_failed("memory source is offline"));
        }

        let receiver = self
            .senders
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(SOURCE_BUFFER).0)
            .subscribe();

        let channel = channel.clone();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => {
                            return Some((Message::new(channel, payload), receiver));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Memory source subscriber on {channel} skipped {skipped} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn alerts() -> Channel {
        Channel::new("alerts").unwrap()
    }

    #[tokio::test]
    async fn test_history_is_returned_oldest_first() {
        let store = MemoryHistoryStore::new();
        store.push(&alerts(), "low-disk");
        store.push(&alerts(), "cpu-spike");

        let window = store.fetch_recent(&alerts()).await.unwrap();
        let payloads: Vec<&str> = window.iter().map(Message::payload).collect();

        assert_eq!(payloads, vec!["low-disk", "cpu-spike"]);
    }

    #[tokio::test]
    async fn test_history_retention_discards_oldest() {
        let store = MemoryHistoryStore::new().with_retention(2);
        for payload in ["m1", "m2", "m3"] {
            store.push(&alerts(), payload);
        }

        let window = store.fetch_recent(&alerts()).await.unwrap();
        let payloads: Vec<&str> = window.iter().map(Message::payload).collect();

        assert_eq!(payloads, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_history_unknown_channel_is_empty() {
        let store = MemoryHistoryStore::new();
        assert!(store.fetch_recent(&alerts()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_offline_reports_store_unavailable() {
        let store = MemoryHistoryStore::new();
        store.set_available(false);

        let err = store.fetch_recent(&alerts()).await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_source_delivers_published_payloads_in_order() {
        let source = MemorySource::new();
        let mut stream = source.subscribe(&alerts()).await.unwrap();

        assert_eq!(source.publish(&alerts(), "one"), 1);
        assert_eq!(source.publish(&alerts(), "two"), 1);

        assert_eq!(stream.next().await.unwrap().payload(), "one");
        assert_eq!(stream.next().await.unwrap().payload(), "two");
    }

    #[tokio::test]
    async fn test_source_disconnect_ends_stream() {
        let source = MemorySource::new();
        let mut stream = source.subscribe(&alerts()).await.unwrap();

        source.disconnect(&alerts());

        assert!(stream.next().await.is_none());
        assert_eq!(source.subscriber_count(&alerts()), 0);
    }

    #[tokio::test]
    async fn test_source_fail_next_counts_down() {
        let source = MemorySource::new();
        source.fail_next(2);

        assert!(source.subscribe(&alerts()).await.is_err());
        assert!(source.subscribe(&alerts()).await.is_err());
        assert!(source.subscribe(&alerts()).await.is_ok());
        assert_eq!(source.subscribe_attempts(), 3);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_reaches_nobody() {
        let source = MemorySource::new();
        assert_eq!(source.publish(&alerts(), "lost"), 0);
    }
}
