//! Periodic refill task.
//!
//! Each limiter owns exactly one of these. The task resets the bucket once
//! per window until it is stopped, either explicitly or when the owner is
//! dropped.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::bucket::PermitBucket;
use crate::error::{Result, TollgateError};

/// Handle to the background task that refills a [`PermitBucket`].
#[derive(Debug)]
pub struct RefillTask {
    /// Held across every tick and across `stop`, so no tick lands after
    /// `stop` returns. The flag is `true` once stopped.
    stopped: Arc<Mutex<bool>>,
    /// Wakes the task loop so it exits without waiting for the next tick
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefillTask {
    /// Spawn the refill task on the current Tokio runtime.
    ///
    /// The first tick fires one `window` after this call; the bucket is
    /// expected to start full.
    pub fn spawn(bucket: Arc<PermitBucket>, window: Duration) -> Result<Self> {
        Self::spawn_with(bucket, window, PermitBucket::refill)
    }

    /// Spawn with a custom tick body in place of [`PermitBucket::refill`].
    fn spawn_with<F>(bucket: Arc<PermitBucket>, window: Duration, tick: F) -> Result<Self>
    where
        F: Fn(&PermitBucket) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            TollgateError::Runtime(format!("refill task needs a Tokio runtime: {}", e))
        })?;

        let first_tick = first_tick_after(Instant::now(), window)?;
        let stopped = Arc::new(Mutex::new(false));
        let cancel = CancellationToken::new();

        let handle = runtime.spawn(run(
            bucket,
            first_tick,
            window,
            tick,
            Arc::clone(&stopped),
            cancel.clone(),
        ));

        Ok(Self {
            stopped,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop refilling.
    ///
    /// Returns `true` if this call stopped the task, `false` if it was
    /// already stopped. Once this returns no further refill is applied.
    pub fn stop(&self) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return false;
        }
        *stopped = true;
        self.cancel.cancel();
        true
    }

    /// Whether [`RefillTask::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Wait for the task loop to exit after [`RefillTask::stop`].
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Refill task terminated abnormally");
                }
            }
        }
    }
}

impl Drop for RefillTask {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Deadline of the first tick, one `window` after `now`.
///
/// The ticker adds `window` to the moment each tick fires, so the clock must
/// also have room for a couple of windows past the first tick.
fn first_tick_after(now: Instant, window: Duration) -> Result<Instant> {
    window
        .checked_mul(3)
        .and_then(|headroom| now.checked_add(headroom))
        .and_then(|_| now.checked_add(window))
        .ok_or_else(|| {
            TollgateError::InvalidConfig(format!("window {:?} is too large", window))
        })
}

async fn run<F>(
    bucket: Arc<PermitBucket>,
    first_tick: Instant,
    window: Duration,
    tick: F,
    stopped: Arc<Mutex<bool>>,
    cancel: CancellationToken,
) where
    F: Fn(&PermitBucket),
{
    let mut ticker = time::interval_at(first_tick, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(window = ?window, capacity = bucket.capacity(), "Refill task started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !tick_once(&bucket, &stopped, &tick) {
                    break;
                }
            }
        }
    }

    info!(refills = bucket.refill_count(), "Refill task stopped");
}

/// Apply one tick unless the task has been stopped.
///
/// Returns `false` once stopped. A panicking tick is logged and the task
/// keeps running.
fn tick_once<F>(bucket: &PermitBucket, stopped: &Mutex<bool>, tick: &F) -> bool
where
    F: Fn(&PermitBucket),
{
    let stopped = stopped.lock();
    if *stopped {
        return false;
    }
    if apply_tick(|| tick(bucket)) {
        debug!(
            available = bucket.available(),
            refills = bucket.refill_count(),
            "Bucket refilled"
        );
    }
    true
}

/// Run one tick body, containing any panic at the tick boundary.
///
/// Returns `false` if the tick panicked. The caller keeps ticking either way.
fn apply_tick<F: FnOnce()>(tick: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(tick)) {
        Ok(()) => true,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "Refill tick panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
