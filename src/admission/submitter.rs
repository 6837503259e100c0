//! Downstream collaborator trait.

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a downstream collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The downstream service refused the payload
    #[error("rejected by downstream: {0}")]
    Rejected(String),

    /// The payload could not be delivered
    #[error("transport failure: {0}")]
    Transport(String),
}

/// An operation gated by the rate limiter.
///
/// Implementations own the transport and the payload format; the gate only
/// decides when `submit` may be called and never inspects what flows
/// through it. Calls are assumed to be side-effecting and non-idempotent.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// What callers hand to the gate.
    type Payload: Send + 'static;
    /// What the downstream service returns.
    type Response: Send;

    /// Deliver one payload downstream.
    async fn submit(&self, payload: Self::Payload) -> Result<Self::Response, SubmissionError>;
}
