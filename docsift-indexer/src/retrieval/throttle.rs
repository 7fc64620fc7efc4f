//! Activity-aware throttle.
//!
//! The host reports user interaction through [`ActivityThrottle::signal_activity`].
//! Any signal moves the throttle to [`ThrottleState::Throttled`] at once; after
//! `idle_period` without a further signal it returns to
//! [`ThrottleState::Active`]. The pipeline calls
//! [`ActivityThrottle::wait_until_active`] between files and sleeps in short
//! polls while throttled, so indexing yields without touching OS priorities.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleState {
    Active,
    Throttled,
}

#[derive(Debug)]
pub struct ActivityThrottle {
    state: watch::Sender<ThrottleState>,
    last_signal: Mutex<Option<Instant>>,
    idle_period: Duration,
    poll_interval: Duration,
}

impl ActivityThrottle {
    pub fn new(idle_period: Duration, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(ThrottleState::Active);
        Self {
            state,
            last_signal: Mutex::new(None),
            idle_period,
            poll_interval,
        }
    }

    pub fn idle_period(&self) -> Duration {
        self.idle_period
    }

    /// Current state without re-evaluating the idle timer.
    pub fn state(&self) -> ThrottleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThrottleState> {
        self.state.subscribe()
    }

    /// Report user interaction.
    pub fn signal_activity(&self) {
        *self.lock_last_signal() = Some(Instant::now());
        self.state.send_if_modified(|state| {
            if *state == ThrottleState::Active {
                debug!("Activity detected, throttling indexing");
                *state = ThrottleState::Throttled;
                true
            } else {
                false
            }
        });
    }

    /// Re-evaluate the idle timer and return the resulting state.
    pub fn refresh(&self) -> ThrottleState {
        let idle = self
            .lock_last_signal()
            .is_none_or(|at| at.elapsed() >= self.idle_period);

        self.state.send_if_modified(|state| {
            if *state == ThrottleState::Throttled && idle {
                debug!("Idle period elapsed, resuming indexing");
                *state = ThrottleState::Active;
                true
            } else {
                false
            }
        });
        self.state()
    }

    /// Sleep in short polls until the throttle is active or `stop` is set.
    ///
    /// Returns whether any time was spent throttled.
    pub async fn wait_until_active(&self, stop: &AtomicBool) -> bool {
        let mut waited = false;
        while !stop.load(Ordering::Relaxed) && self.refresh() == ThrottleState::Throttled {
            waited = true;
            tokio::time::sleep(self.poll_interval).await;
        }
        tokio::task::yield_now().await;
        waited
    }

    /// Keep the state current for watchers until `shutdown` turns true.
    pub fn spawn_monitor(
        self: &std::sync::Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let throttle = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(throttle.poll_interval) => {
                        throttle.refresh();
                    }
                }
            }
            debug!("Throttle monitor stopped");
        })
    }

    fn lock_last_signal(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_signal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ActivityThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(50))
    }
}
