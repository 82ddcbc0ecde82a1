//! Change-notification listener
//!
//! Keeps one connection to the push channel open and turns every inbound
//! event into a full resync request. Keep-alive comments only prove the
//! connection is healthy. On connection loss the listener reconnects with
//! capped exponential backoff and asks for a resync once connected again,
//! since signals may have been missed in between.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dqr_common::config::ClientConfig;
use dqr_common::events::{EventBus, ReviewEvent};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::SyncOrchestrator;
use crate::remote::{ChangeFeed, ChangeSignal};

/// Reconnect delays: `initial`, doubling after each failed attempt, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.reconnect_initial, config.reconnect_max)
    }

    /// Delay before attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Push-channel client driving refreshes through the orchestrator
pub struct ChangeListener {
    feed: Arc<dyn ChangeFeed>,
    orchestrator: Arc<SyncOrchestrator>,
    events: EventBus,
    policy: ReconnectPolicy,
    /// Resync on the first successful connect as well as on reconnects
    resync_first_connect: bool,
}

impl ChangeListener {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        orchestrator: Arc<SyncOrchestrator>,
        events: EventBus,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            feed,
            orchestrator,
            events,
            policy,
            resync_first_connect: true,
        }
    }

    /// The caller has just loaded every queue; only reconnects resync
    pub fn after_initial_load(mut self) -> Self {
        self.resync_first_connect = false;
        self
    }

    /// Run the listener on its own task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Connect, listen, reconnect; returns once `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        let mut resync = self.resync_first_connect;

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.feed.connect() => result,
            };

            let reason = match connected {
                Ok(mut stream) => {
                    info!("Listening for remote changes");
                    self.events.emit_lossy(ReviewEvent::ListenerConnected {
                        timestamp: Utc::now(),
                    });
                    if resync {
                        self.orchestrator.request_refresh();
                    }
                    resync = true;

                    let mut first_frame = true;
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => {
                                info!("Change listener stopped");
                                return;
                            }
                            next = stream.next() => next,
                        };

                        match next {
                            Some(Ok(signal)) => {
                                if first_frame {
                                    attempt = 0;
                                    first_frame = false;
                                }
                                match signal {
                                    ChangeSignal::Changed => {
                                        debug!("Remote change signalled");
                                        self.events.emit_lossy(ReviewEvent::RemoteChanged {
                                            timestamp: Utc::now(),
                                        });
                                        self.orchestrator.request_refresh();
                                    }
                                    ChangeSignal::KeepAlive => {}
                                }
                            }
                            Some(Err(e)) => break e.to_string(),
                            None => break "push channel closed".to_string(),
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);

            warn!(
                reason = %reason,
                retry_in_ms = delay.as_millis() as u64,
                "Push channel lost, reconnecting"
            );
            self.events.emit_lossy(ReviewEvent::ListenerDisconnected {
                reason,
                retry_in_ms: delay.as_millis() as u64,
                timestamp: Utc::now(),
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Change listener stopped");
    }
}
