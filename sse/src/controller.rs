//! Per-client session lifecycle.
//!
//! ```text
//! Opening -> Replaying -> Live -> Closed
//!    |           |                  ^
//!    +-----------+------------------+
//! ```
//!
//! Every exit path funnels into [`StreamSessionController::close`], which
//! runs once per session, including when the controller is dropped without
//! finishing.

use crate::registry::FanoutRegistry;
use crate::session::Session;
use crate::subscription::ChannelSubscription;
use crate::writer::SessionWriter;
use events::{HistoryStore, Message};
use log::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Opening,
    Replaying,
    Live,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client disconnected or a write to it failed.
    PeerClosed,
    /// The server is shutting down.
    Shutdown,
    /// The controller stopped without reaching a normal end, e.g. its task
    /// was aborted.
    Aborted,
}

/// Drives one client's session from opening to cleanup.
pub struct StreamSessionController {
    session: Session,
    phase: Phase,
    history: Arc<dyn HistoryStore>,
    registry: Arc<FanoutRegistry>,
    subscription: Arc<ChannelSubscription>,
    shutdown: CancellationToken,
}

impl StreamSessionController {
    pub fn new(
        session: Session,
        history: Arc<dyn HistoryStore>,
        registry: Arc<FanoutRegistry>,
        subscription: Arc<ChannelSubscription>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            phase: Phase::Opening,
            history,
            registry,
            subscription,
            shutdown,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs the session to completion and returns why it ended.
    pub async fn run(mut self) -> CloseReason {
        let reason = self.drive().await;
        self.close(reason);
        reason
    }

    async fn drive(&mut self) -> CloseReason {
        if let Err(reason) = self.open().await {
            return reason;
        }
        if let Err(reason) = self.replay().await {
            return reason;
        }
        self.live().await
    }

    async fn open(&mut self) -> Result<(), CloseReason> {
        debug!(
            "Opening session {} on channel {}",
            self.session.id(),
            self.session.channel()
        );
        self.subscription.start(self.session.channel());

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(CloseReason::Shutdown),
            written = SessionWriter::write_preamble(&self.session) => {
                written.map_err(|_| CloseReason::PeerClosed)
            }
        }
    }

    async fn replay(&mut self) -> Result<(), CloseReason> {
        self.phase = Phase::Replaying;

        let fetched = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(CloseReason::Shutdown),
            _ = peer_closed(&self.session) => return Err(CloseReason::PeerClosed),
            fetched = self.history.fetch_recent(self.session.channel()) => fetched,
        };

        match fetched {
            Ok(window) => {
                debug!(
                    "Replaying {} message(s) to session {}",
                    window.len(),
                    self.session.id()
                );
                for message in &window {
                    self.write(message).await?;
                }
            }
            Err(e) => warn!(
                "Skipping replay for session {} on channel {}: {e}",
                self.session.id(),
                self.session.channel()
            ),
        }
        Ok(())
    }

    async fn live(&mut self) -> CloseReason {
        self.phase = Phase::Live;
        self.registry.register(&self.session);

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CloseReason::Shutdown,
                _ = peer_closed(&self.session) => return CloseReason::PeerClosed,
                message = self.session.next_message() => message,
            };

            // Unreachable while running: only `close` closes the queue, and
            // it runs after this loop returns.
            let Some(message) = message else {
                return CloseReason::Aborted;
            };
            if let Err(reason) = self.write(&message).await {
                return reason;
            }
        }
    }

    /// Writes one event, giving up if the server shuts down while the
    /// client is not reading.
    async fn write(&mut self, message: &Message) -> Result<(), CloseReason> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(CloseReason::Shutdown),
            written = SessionWriter::write(&mut self.session, message) => {
                written.map_err(|_| CloseReason::PeerClosed)
            }
        }
    }

    /// The single cleanup path. Later calls are no-ops.
    fn close(&mut self, reason: CloseReason) {
        if self.phase == Phase::Closed {
            return;
        }

        // Close the queue first so a concurrent delivery pass sees the
        // session as gone.
        self.session.begin_close();
        self.registry.deregister(&self.session);
        self.session.finish_close();
        self.phase = Phase::Closed;

        debug!(
            "Closed session {} on channel {} after {} event(s): {reason:?}",
            self.session.id(),
            self.session.channel(),
            self.session.sequence()
        );
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        self.close(CloseReason::Aborted);
    }
}

async fn peer_closed(session: &Session) {
    if let Some(transport) = session.transport() {
        transport.closed().await;
    }
}
