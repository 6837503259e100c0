//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::bucket::PermitBucket;
use super::refill::RefillTask;
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};

/// A resetting token-bucket rate limiter.
///
/// At most `capacity` permits are granted per `window`. Every window the
/// bucket is reset to full capacity by a background task; unused permits are
/// discarded rather than accumulated.
///
/// This struct is thread-safe and meant to be shared behind an [`Arc`]
/// across any number of callers. All synchronization is internal.
pub struct RateLimiter {
    bucket: Arc<PermitBucket>,
    window: Duration,
    refill: RefillTask,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.bucket.capacity())
            .field("window", &self.window)
            .field("available", &self.bucket.available())
            .field("shutdown", &self.refill.is_stopped())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter granting `capacity` permits per `window`.
    ///
    /// The bucket starts full and the refill task is spawned on the current
    /// Tokio runtime, first firing one window from now.
    pub fn new(capacity: u64, window: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(TollgateError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::InvalidConfig(
                "window must be greater than zero".to_string(),
            ));
        }

        let bucket = Arc::new(PermitBucket::new(capacity));
        let refill = RefillTask::spawn(Arc::clone(&bucket), window)?;

        info!(capacity = capacity, window = ?window, "Rate limiter initialized");

        Ok(Self {
            bucket,
            window,
            refill,
        })
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.capacity, config.window())
    }

    /// Take a permit if one is available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let granted = self.bucket.try_take();
        if !granted {
            trace!(capacity = self.bucket.capacity(), "No permit available");
        }
        granted
    }

    /// Wait until a permit is granted to this call.
    ///
    /// Returns immediately when a permit is available. Otherwise the task
    /// parks until the next refill; several waiters may race for the
    /// refilled permits and the losers park again. No ordering between
    /// waiters is guaranteed.
    ///
    /// Fails with [`TollgateError::Shutdown`] once the limiter has been shut
    /// down and the bucket is empty.
    pub async fn acquire(&self) -> Result<()> {
        loop {
            let notified = self.bucket.notified();
            tokio::pin!(notified);
            // Register before checking so a refill between the check and
            // the await still wakes us.
            notified.as_mut().enable();

            if self.bucket.try_take() {
                return Ok(());
            }
            if self.refill.is_stopped() {
                return Err(TollgateError::Shutdown);
            }

            trace!("Waiting for refill");
            notified.await;
        }
    }

    /// Wait at most `timeout` for a permit.
    ///
    /// Returns `false` if none was granted in time. A failed attempt never
    /// consumes a permit.
    pub async fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_within(timeout).await.is_ok()
    }

    /// Like [`RateLimiter::acquire_timeout`], reporting the failure reason.
    pub async fn acquire_within(&self, timeout: Duration) -> Result<()> {
        match time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout = ?timeout, "Permit acquisition timed out");
                Err(TollgateError::AcquisitionTimeout(timeout))
            }
        }
    }

    /// Wait for a permit unless `cancel` fires first.
    pub async fn acquire_until_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Permit acquisition cancelled");
                Err(TollgateError::Cancelled)
            }
            result = self.acquire() => result,
        }
    }

    /// Wait at most `timeout` for a permit unless `cancel` fires first.
    pub async fn acquire_within_until_cancelled(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Permit acquisition cancelled");
                Err(TollgateError::Cancelled)
            }
            result = self.acquire_within(timeout) => result,
        }
    }

    /// Stop the refill task.
    ///
    /// Idempotent. Permits still in the bucket can be taken afterwards, but
    /// the bucket is never refilled again; parked waiters are woken and fail
    /// with [`TollgateError::Shutdown`] once it runs dry.
    pub fn shutdown(&self) {
        if self.refill.stop() {
            self.bucket.wake_all();
            info!(
                available = self.bucket.available(),
                refills = self.bucket.refill_count(),
                "Rate limiter shut down"
            );
        }
    }

    /// Shut down and wait for the refill task to exit.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        self.refill.join().await;
    }

    /// Whether [`RateLimiter::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.refill.is_stopped()
    }

    /// Maximum permits per window.
    pub fn capacity(&self) -> u64 {
        self.bucket.capacity()
    }

    /// Time between refills.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Permits left in the current window.
    pub fn available(&self) -> u64 {
        self.bucket.available()
    }

    /// Number of refills applied since construction.
    pub fn refill_count(&self) -> u64 {
        self.bucket.refill_count()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
