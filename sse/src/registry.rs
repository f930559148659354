use crate::queue::{Enqueued, SessionQueue};
use crate::session::{Session, SessionId};
use dashmap::DashMap;
use events::{Channel, Message};
use log::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one delivery pass over a channel's sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions the message was queued for.
    pub queued: usize,
    /// Of those, sessions that had to drop their oldest queued message.
    pub dropped: usize,
    /// Sessions found closed and deregistered during the pass.
    pub closed: usize,
}

/// Registry of live sessions with dual indices for O(1) lookups
pub struct FanoutRegistry {
    /// Primary storage: live session queues per channel, read by every delivery
    channels: DashMap<Channel, HashMap<SessionId, Arc<SessionQueue>>>,

    /// Secondary index: channel of each registered session, for deregistration
    session_index: DashMap<SessionId, Channel>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            session_index: DashMap::new(),
        }
    }

    /// Adds a session to its channel's live set. Returns `false` if it was
    /// already registered or has started closing.
    pub fn register(&self, session: &Session) -> bool {
        if session.queue().is_closed() {
            return false;
        }
        if self.session_index.contains_key(session.id()) {
            return false;
        }

        self.session_index
            .insert(session.id().clone(), session.channel().clone());

        // Holding the channel's entry excludes deliveries to it until the
        // session is fully inserted.
        self.channels
            .entry(session.channel().clone())
            .or_default()
            .insert(session.id().clone(), session.queue().clone());

        debug!(
            "Registered session {} on channel {}",
            session.id(),
            session.channel()
        );
        true
    }

    /// Removes a session. Returns `false` if it was not registered, which
    /// makes repeated calls harmless.
    pub fn deregister(&self, session: &Session) -> bool {
        self.deregister_id(session.id())
    }

    fn deregister_id(&self, session_id: &SessionId) -> bool {
        let Some((_, channel)) = self.session_index.remove(session_id) else {
            return false;
        };

        if let Some(mut sessions) = self.channels.get_mut(&channel) {
            sessions.remove(session_id);
        }
        // Clean up empty channel entries
        self.channels
            .remove_if(&channel, |_, sessions| sessions.is_empty());

        debug!("Deregistered session {session_id} from channel {channel}");
        true
    }

    /// Queues `message` for every session registered on `channel`.
    ///
    /// Never waits on a client. Sessions found closed are deregistered after
    /// the pass; the remaining sessions still receive the message.
    pub fn deliver(&self, channel: &Channel, message: &Message) -> Delivery {
        let mut delivery = Delivery::default();
        let mut closed = Vec::new();

        if let Some(sessions) = self.channels.get(channel) {
            for (session_id, queue) in sessions.iter() {
                match queue.push(message.clone()) {
                    Ok(Enqueued::Queued) => delivery.queued += 1,
                    Ok(Enqueued::DroppedOldest) => {
                        delivery.queued += 1;
                        delivery.dropped += 1;
                    }
                    Err(_) => closed.push(session_id.clone()),
                }
            }
        }

        // The read guard is released before deregistering, which needs
        // write access to the same entry.
        for session_id in &closed {
            if self.deregister_id(session_id) {
                delivery.closed += 1;
            }
        }

        if delivery.dropped > 0 {
            warn!(
                "{} session(s) on channel {channel} fell behind and dropped their oldest queued message",
                delivery.dropped
            );
        }

        delivery
    }

    pub fn is_registered(&self, session_id: &SessionId) -> bool {
        self.session_index.contains_key(session_id)
    }

    pub fn session_count(&self, channel: &Channel) -> usize {
        self.channels
            .get(channel)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    /// Number of channels with at least one registered session.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for FanoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}
