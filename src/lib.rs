//! Tollgate - client-side admission control
//!
//! This crate bounds how many outbound operations a client may start per
//! window. A resetting token bucket hands out permits to any number of
//! concurrent callers and a single background task refills it every window.
//! Callers that find the bucket empty wait for the next refill instead of
//! spinning.

pub mod admission;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use admission::{AdmissionGate, SubmissionError, Submitter};
pub use error::{Result, TollgateError};
pub use ratelimit::RateLimiter;
