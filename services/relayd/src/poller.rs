//! Background state poller
//!
//! Each cycle submits one [`Operation::Snapshot`] through the serializer.
//! Cycles that land inside the avoidance window after a command wait in
//! short slices until the window has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::StateCache;
use crate::config::DaemonConfig;
use crate::error::{ErrorKind, Result};
use crate::serializer::{Operation, SerializerHandle};

/// True once `window` has passed since the last command, or if there was none
pub fn should_poll(last_command: Option<Instant>, now: Instant, window: Duration) -> bool {
    match last_command {
        Some(at) => now.saturating_duration_since(at) >= window,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub interval: Duration,
    pub avoidance_window: Duration,
    pub skip_slice: Duration,
    pub wait: Duration,
}

impl From<&DaemonConfig> for PollTiming {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            avoidance_window: config.avoidance_window(),
            skip_slice: config.skip_slice(),
            wait: config.poll_wait(),
        }
    }
}

pub struct StatePoller {
    serializer: SerializerHandle,
    cache: Arc<StateCache>,
    timing: PollTiming,
}

impl StatePoller {
    pub fn new(serializer: SerializerHandle, cache: Arc<StateCache>, timing: PollTiming) -> Self {
        Self {
            serializer,
            cache,
            timing,
        }
    }

    /// Poll until `shutdown` fires (`Ok`) or the transport goes away (`Err`).
    ///
    /// Timeouts, garbled frames and device exceptions leave the cache as it
    /// was; the next cycle is the retry.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.timing.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Poller: every {}ms, avoid {}ms after commands",
            self.timing.interval.as_millis(),
            self.timing.avoidance_window.as_millis()
        );

        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            if !self.wait_out_window(&shutdown).await {
                break;
            }

            match self
                .serializer
                .submit(Operation::Snapshot, self.timing.wait)
                .await
            {
                Ok(_) => {
                    if failures > 0 {
                        info!("Poll recovered after {} failures", failures);
                        failures = 0;
                    }
                },
                Err(e) if e.kind() == ErrorKind::TransportUnavailable => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    error!("Poller stopped: {}", e);
                    return Err(e);
                },
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!("Poll failed ({}), keeping cached state: {}", e.kind(), e);
                },
            }
        }

        debug!("Poller stopped");
        Ok(())
    }

    /// Sleep in slices while a recent command is settling. False on shutdown.
    async fn wait_out_window(&self, shutdown: &CancellationToken) -> bool {
        loop {
            let last = self.cache.last_command();
            let now = Instant::now();
            if should_poll(last, now, self.timing.avoidance_window) {
                return true;
            }
            if let Some(at) = last {
                debug!(
                    "Poll skipped: {}ms since command",
                    now.saturating_duration_since(at).as_millis()
                );
            }
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = sleep(self.timing.skip_slice) => {},
            }
        }
    }
}

/// Spawnable wrapper that also cancels `shutdown` when polling dies
pub async fn run_until_fatal(poller: StatePoller, shutdown: CancellationToken) -> Result<()> {
    let result = poller.run(shutdown.clone()).await;
    if result.is_err() {
        shutdown.cancel();
    }
    result
}
