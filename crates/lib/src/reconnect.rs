//! Reconnect supervisor: reopens the notification channel after it closes.
//!
//! Each channel still treats Closed as terminal. The supervisor sits outside it and opens a
//! fresh channel after an exponential backoff (Closed -> Connecting), until stopped or until
//! `max_attempts` consecutive attempts fail to open.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{self, ChannelError, ChannelHandle, CounterStore, Credential, NotificationSink};
use crate::config::{MassPredicate, ReconnectConfig};

/// Backoff settings for reopening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(c: &ReconnectConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(c.initial_backoff_ms),
            max_backoff: Duration::from_millis(c.max_backoff_ms.max(c.initial_backoff_ms)),
            max_attempts: c.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reopen attempt `attempt` (0-based): initial * 2^attempt, capped at max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay before reopening, given how many attempts in a row failed to open.
    /// A channel that was open (0 failures) and the first failure both wait `initial_backoff`.
    pub fn retry_delay(&self, failed_attempts: u32) -> Duration {
        self.backoff(failed_attempts.saturating_sub(1))
    }
}

/// Everything needed to open the channel again.
struct ChannelSpec {
    endpoint: String,
    credential: Credential,
    predicate: MassPredicate,
    sink: Arc<dyn NotificationSink>,
    counter: Arc<dyn CounterStore>,
}

impl ChannelSpec {
    fn open(&self) -> Result<ChannelHandle, ChannelError> {
        channel::open(
            &self.endpoint,
            self.credential.clone(),
            self.predicate,
            self.sink.clone(),
            self.counter.clone(),
        )
    }
}

/// Running supervisor. Dropping it (or calling [`Supervisor::stop`]) closes the current channel.
pub struct Supervisor {
    current: watch::Receiver<ChannelHandle>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Open the first channel and start supervising it. A malformed endpoint fails here.
    pub fn start(
        endpoint: impl Into<String>,
        credential: Credential,
        predicate: MassPredicate,
        sink: Arc<dyn NotificationSink>,
        counter: Arc<dyn CounterStore>,
        policy: ReconnectPolicy,
    ) -> Result<Self, ChannelError> {
        let spec = ChannelSpec {
            endpoint: endpoint.into(),
            credential,
            predicate,
            sink,
            counter,
        };
        let first = spec.open()?;
        let (current_tx, current_rx) = watch::channel(first);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(spec, policy, current_tx, stop_rx));
        Ok(Self {
            current: current_rx,
            stop_tx,
            task: Some(task),
        })
    }

    /// Handle to the channel currently being driven.
    pub fn current(&self) -> ChannelHandle {
        self.current.borrow().clone()
    }

    pub fn request_mass_notification(&self) -> Result<(), ChannelError> {
        self.current().request_mass_notification()
    }

    /// Stop reopening and close the current channel.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Wait for the supervisor loop to end (after `stop`, or when attempts are exhausted).
    /// Returns immediately once it has already finished.
    pub async fn finished(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if let Err(e) = task.await {
            log::warn!("reconnect supervisor task failed: {}", e);
        }
        self.task = None;
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

async fn supervise(
    spec: ChannelSpec,
    policy: ReconnectPolicy,
    current_tx: watch::Sender<ChannelHandle>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut handle = current_tx.borrow().clone();
    let mut failed_attempts: u32 = 0;

    loop {
        let opened = tokio::select! {
            opened = handle.opened() => opened,
            _ = stopped(&mut stop_rx) => {
                handle.close();
                break;
            }
        };
        if opened {
            failed_attempts = 0;
            tokio::select! {
                _ = handle.closed() => {}
                _ = stopped(&mut stop_rx) => {
                    handle.close();
                    break;
                }
            }
        } else {
            failed_attempts += 1;
        }

        if let Some(max) = policy.max_attempts {
            if failed_attempts >= max {
                log::warn!(
                    "giving up on {} after {} failed attempt(s)",
                    spec.endpoint,
                    failed_attempts
                );
                break;
            }
        }

        let delay = policy.retry_delay(failed_attempts);
        log::info!(
            "notification channel to {} closed; reopening in {:?}",
            spec.endpoint,
            delay
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut stop_rx) => break,
        }

        handle = match spec.open() {
            Ok(h) => h,
            Err(e) => {
                log::error!("reopening notification channel failed: {}", e);
                break;
            }
        };
        current_tx.send_replace(handle.clone());
    }
    log::info!("reconnect supervisor for {} stopped", spec.endpoint);
}
