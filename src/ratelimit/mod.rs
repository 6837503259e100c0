//! Rate limiting logic and state management.

mod bucket;
mod limiter;
mod refill;

pub use bucket::PermitBucket;
pub use limiter::RateLimiter;
pub use refill::RefillTask;
