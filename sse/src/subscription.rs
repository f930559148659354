//! Supervised upstream subscriptions, one per channel.

use crate::registry::FanoutRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{Channel, Message, MessageSource};
use futures::StreamExt;
use log::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exponential backoff between reconnect attempts.
///
/// Delays grow as `base_delay * 2^attempt`, capped at `max_delay`. After
/// `max_retries` consecutive failures the fault is escalated.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(attempt.min(30) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether `failures` consecutive failures exceed the retry budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Raised when a channel's subscription could not be re-established within
/// the retry budget. Sessions stay open; the process is expected to restart.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFault {
    pub channel: Channel,
    pub attempts: u32,
}

impl fmt::Display for SubscriptionFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "subscription to channel {} failed {} consecutive times",
            self.channel, self.attempts
        )
    }
}

/// Keeps exactly one upstream subscription per channel, independent of how
/// many sessions are attached, and routes its messages into the registry.
pub struct ChannelSubscription {
    source: Arc<dyn MessageSource>,
    registry: Arc<FanoutRegistry>,
    backoff: Backoff,
    tasks: DashMap<Channel, JoinHandle<()>>,
    shutdown: CancellationToken,
    faults: Arc<watch::Sender<Option<SubscriptionFault>>>,
}

impl ChannelSubscription {
    /// Subscription tasks stop when `shutdown` is cancelled or this value is
    /// dropped, whichever comes first.
    pub fn new(
        source: Arc<dyn MessageSource>,
        registry: Arc<FanoutRegistry>,
        backoff: Backoff,
        shutdown: &CancellationToken,
    ) -> Self {
        let (faults, _) = watch::channel(None);
        Self {
            source,
            registry,
            backoff,
            tasks: DashMap::new(),
            shutdown: shutdown.child_token(),
            faults: Arc::new(faults),
        }
    }

    /// Ensures a subscription to `channel` is running. Returns `true` if this
    /// call started it; a running subscription is left untouched.
    pub fn start(&self, channel: &Channel) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        match self.tasks.entry(channel.clone()) {
            Entry::Occupied(entry) if !entry.get().is_finished() => false,
            Entry::Occupied(mut entry) => {
                info!("Restarting subscription to channel {channel}");
                entry.insert(self.spawn(channel.clone()));
                true
            }
            Entry::Vacant(entry) => {
                info!("Starting subscription to channel {channel}");
                entry.insert(self.spawn(channel.clone()));
                true
            }
        }
    }

    /// Channels whose subscription task is still running.
    pub fn active_channels(&self) -> Vec<Channel> {
        self.tasks
            .iter()
            .filter(|task| !task.value().is_finished())
            .map(|task| task.key().clone())
            .collect()
    }

    /// Observes escalated faults. Holds `None` until a subscription gives up.
    pub fn faults(&self) -> watch::Receiver<Option<SubscriptionFault>> {
        self.faults.subscribe()
    }

    /// Stops every subscription. Later `start` calls are ignored.
    pub fn stop_all(&self) {
        self.shutdown.cancel();
        self.tasks.clear();
    }

    fn spawn(&self, channel: Channel) -> JoinHandle<()> {
        let supervisor = Supervisor {
            channel,
            source: self.source.clone(),
            registry: self.registry.clone(),
            backoff: self.backoff.clone(),
            shutdown: self.shutdown.clone(),
            faults: self.faults.clone(),
        };
        tokio::spawn(supervisor.run())
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Routes one received message into the registry. Delivery only enqueues,
/// so the subscription keeps reading while slow sessions catch up.
fn on_message(registry: &FanoutRegistry, message: Message) {
    let delivery = registry.deliver(message.channel(), &message);
    trace!(
        "Delivered message on {} to {} session(s)",
        message.channel(),
        delivery.queued
    );
}

struct Supervisor {
    channel: Channel,
    source: Arc<dyn MessageSource>,
    registry: Arc<FanoutRegistry>,
    backoff: Backoff,
    shutdown: CancellationToken,
    faults: Arc<watch::Sender<Option<SubscriptionFault>>>,
}

impl Supervisor {
    async fn run(self) {
        let channel = &self.channel;
        // Consecutive attempts that failed to subscribe, counting the drop
        // of the last established subscription.
        let mut failures: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                subscribed = self.source.subscribe(channel) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!("Subscribed to channel {channel}");
                    failures = 0;
                    loop {
                        let next = tokio::select! {
                            _ = self.shutdown.cancelled() => None,
                            next = stream.next() => Some(next),
                        };
                        match next {
                            None => {
                                debug!("Subscription to channel {channel} stopped");
                                return;
                            }
                            Some(Some(message)) => on_message(&self.registry, message),
                            Some(None) => {
                                warn!("Subscription to channel {channel} lost");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("Subscribing to channel {channel} failed: {e}"),
            }

            failures += 1;
            if self.backoff.exhausted(failures) {
                let fault = SubscriptionFault {
                    channel: channel.clone(),
                    attempts: failures,
                };
                error!("Giving up: {fault}");
                self.faults.send_replace(Some(fault));
                return;
            }

            let delay = self.backoff.delay(failures - 1);
            warn!(
                "Reconnecting to channel {channel} in {delay:?} (attempt {failures} of {})",
                self.backoff.max_retries
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Subscription to channel {channel} stopped");
    }
}
