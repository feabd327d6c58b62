//! Preemptive renewal timer.
//!
//! At most one timer is live per scheduler. Arming always cancels the
//! previous timer first; a timer that fires removes itself from the slot
//! before running its callback, so a re-arm caused by that callback's own
//! renewal cannot abort it.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::clock::Clock;
use super::credential::{expiry_of, AccessCredential};
use crate::utils::lock;

struct ArmedTimer {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: AbortHandle,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    armed: Option<ArmedTimer>,
}

pub struct RefreshScheduler {
    clock: Arc<dyn Clock>,
    slot: Arc<Mutex<TimerSlot>>,
}

impl RefreshScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slot: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    /// Arm a one-shot timer firing `margin` before the credential expires.
    ///
    /// Any previously armed timer is cancelled, even when the new credential
    /// has no decodable expiry (in which case nothing is armed and `false`
    /// is returned). A fire time already in the past still fires, on a
    /// spawned task rather than inside this call.
    pub fn arm<F, Fut>(&self, credential: &AccessCredential, margin: Duration, on_due: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.armed.take() {
            previous.handle.abort();
            debug!(generation = previous.generation, "Cancelled previous refresh timer");
        }

        let Some(expiry) = expiry_of(credential) else {
            debug!("Credential has no readable expiry, refresh timer not armed");
            return false;
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime available, refresh timer not armed");
                return false;
            }
        };

        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        let fire_at = expiry
            .checked_sub_signed(margin)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        // Negative deltas fail to convert: fire right away
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);

        slot.generation += 1;
        let generation = slot.generation;
        let timer_slot = Arc::clone(&self.slot);

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut slot = lock(&timer_slot);
                match &slot.armed {
                    Some(timer) if timer.generation == generation => slot.armed = None,
                    // Replaced between wake-up and here
                    _ => return,
                }
            }

            debug!(generation, "Refresh timer fired");
            on_due().await;
        });

        debug!(
            generation,
            delay_secs = delay.as_secs(),
            "Armed refresh timer"
        );
        slot.armed = Some(ArmedTimer {
            generation,
            fire_at,
            handle: task.abort_handle(),
        });
        true
    }

    /// Disarm the live timer, if any.
    pub fn cancel(&self) {
        if let Some(timer) = lock(&self.slot).armed.take() {
            timer.handle.abort();
            debug!(generation = timer.generation, "Refresh timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.slot).armed.is_some()
    }

    /// When the live timer is due, if one is armed.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot).armed.as_ref().map(|t| t.fire_at)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
