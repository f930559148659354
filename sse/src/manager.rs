use crate::controller::StreamSessionController;
use crate::registry::FanoutRegistry;
use crate::session::{Session, SessionId, Transport, TransportReceiver};
use crate::subscription::{Backoff, ChannelSubscription, SubscriptionFault};
use events::{Channel, HistoryStore, MessageSource};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Tunables for sessions and subscriptions.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Live messages buffered per session before the oldest is dropped.
    pub queue_capacity: usize,
    /// Events buffered between a session and its HTTP response.
    pub transport_capacity: usize,
    /// Keep-alive comment interval on idle streams; `None` disables it.
    pub keep_alive: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            transport_capacity: 16,
            keep_alive: Some(Duration::from_secs(15)),
            backoff: Backoff::default(),
        }
    }
}

/// Entry point of the fan-out core: owns the registry and the channel
/// subscriptions, and spawns one controller task per client.
pub struct Manager {
    history: Arc<dyn HistoryStore>,
    registry: Arc<FanoutRegistry>,
    subscription: Arc<ChannelSubscription>,
    settings: Settings,
    shutdown: CancellationToken,
}

impl Manager {
    /// Sessions and subscriptions end when `shutdown` is cancelled.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        source: Arc<dyn MessageSource>,
        settings: Settings,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(FanoutRegistry::new());
        let subscription = Arc::new(ChannelSubscription::new(
            source,
            registry.clone(),
            settings.backoff.clone(),
            &shutdown,
        ));
        Self {
            history,
            registry,
            subscription,
            settings,
            shutdown,
        }
    }

    /// Subscribes to `channel` ahead of the first client.
    pub fn start_channel(&self, channel: &Channel) -> bool {
        self.subscription.start(channel)
    }

    /// Opens a session on `channel` and spawns its controller. The returned
    /// receiver yields the session's events and ends when the session
    /// closes; dropping it closes the session.
    pub fn open_session(&self, channel: Channel) -> (SessionId, TransportReceiver) {
        let (transport, receiver) = Transport::channel(self.settings.transport_capacity);
        let session = Session::new(channel, transport, self.settings.queue_capacity);
        let session_id = session.id().clone();

        let controller = StreamSessionController::new(
            session,
            self.history.clone(),
            self.registry.clone(),
            self.subscription.clone(),
            self.shutdown.child_token(),
        );

        let id = session_id.clone();
        tokio::spawn(async move {
            let reason = controller.run().await;
            trace!("Session {id} ended: {reason:?}");
        });

        debug!("Opened session {session_id}");
        (session_id, receiver)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<FanoutRegistry> {
        &self.registry
    }

    pub fn active_channels(&self) -> Vec<Channel> {
        self.subscription.active_channels()
    }

    /// Observes subscriptions that gave up reconnecting.
    pub fn faults(&self) -> watch::Receiver<Option<SubscriptionFault>> {
        self.subscription.faults()
    }

    /// Ends every session and subscription.
    pub fn shutdown(&self) {
        info!("Shutting down stream sessions and subscriptions");
        self.shutdown.cancel();
        self.subscription.stop_all();
    }
}
