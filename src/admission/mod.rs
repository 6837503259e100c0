//! Admission policy in front of a downstream collaborator.
//!
//! Callers go through an [`AdmissionGate`], which takes a permit from the
//! shared [`RateLimiter`](crate::ratelimit::RateLimiter) before invoking the
//! wrapped [`Submitter`].

mod gate;
mod submitter;

pub use gate::{AdmissionGate, GateStats};
pub use submitter::{SubmissionError, Submitter};
