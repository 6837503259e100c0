//! Acquire-then-submit gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::submitter::Submitter;
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiter;

/// Counters describing what passed through a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    /// Submissions that obtained a permit and reached the submitter
    pub admitted: u64,
    /// Submissions turned away before reaching the submitter
    pub denied: u64,
    /// Admitted submissions the submitter reported as failed
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    denied: AtomicU64,
    failed: AtomicU64,
}

/// Gates a [`Submitter`] behind a shared [`RateLimiter`].
///
/// A submission reaches the submitter only after a permit was granted to
/// it. When no permit is obtained the submitter is not called at all. A
/// failed submission still consumes its permit: permits are a rate budget,
/// not a success credit.
pub struct AdmissionGate<S: Submitter> {
    limiter: Arc<RateLimiter>,
    submitter: S,
    counters: Counters,
}

impl<S: Submitter> AdmissionGate<S> {
    /// Create a gate over `submitter` drawing permits from `limiter`.
    pub fn new(limiter: Arc<RateLimiter>, submitter: S) -> Self {
        Self {
            limiter,
            submitter,
            counters: Counters::default(),
        }
    }

    /// Wait for a permit, then submit.
    pub async fn submit(&self, payload: S::Payload) -> Result<S::Response> {
        let admission = self.limiter.acquire().await;
        self.admit(admission)?;
        self.forward(payload).await
    }

    /// Wait at most `timeout` for a permit, then submit.
    ///
    /// On timeout the payload is dropped without reaching the submitter.
    pub async fn submit_within(
        &self,
        payload: S::Payload,
        timeout: Duration,
    ) -> Result<S::Response> {
        let admission = self.limiter.acquire_within(timeout).await;
        self.admit(admission)?;
        self.forward(payload).await
    }

    /// Submit only if a permit is available right now.
    pub async fn try_submit(&self, payload: S::Payload) -> Result<S::Response> {
        let admission = if self.limiter.try_acquire() {
            Ok(())
        } else {
            Err(TollgateError::Throttled)
        };
        self.admit(admission)?;
        self.forward(payload).await
    }

    /// Wait for a permit unless `cancel` fires first, then submit.
    pub async fn submit_until_cancelled(
        &self,
        payload: S::Payload,
        cancel: &CancellationToken,
    ) -> Result<S::Response> {
        let admission = self.limiter.acquire_until_cancelled(cancel).await;
        self.admit(admission)?;
        self.forward(payload).await
    }

    /// Wait at most `timeout` for a permit unless `cancel` fires first, then
    /// submit.
    ///
    /// Cancellation only interrupts the wait. Once admitted, the submission
    /// runs to completion.
    pub async fn submit_within_until_cancelled(
        &self,
        payload: S::Payload,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<S::Response> {
        let admission = self
            .limiter
            .acquire_within_until_cancelled(timeout, cancel)
            .await;
        self.admit(admission)?;
        self.forward(payload).await
    }

    /// The limiter this gate draws permits from.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The wrapped submitter.
    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    /// Snapshot of the gate counters.
    pub fn stats(&self) -> GateStats {
        GateStats {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn admit(&self, admission: Result<()>) -> Result<()> {
        match admission {
            Ok(()) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.denied.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Submission not admitted");
                Err(e)
            }
        }
    }

    #[instrument(skip_all)]
    async fn forward(&self, payload: S::Payload) -> Result<S::Response> {
        match self.submitter.submit(payload).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Downstream submission failed");
                Err(e.into())
            }
        }
    }
}
