//! Permit bucket shared between acquirers and the refill task.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A resetting token bucket.
///
/// Permits are taken with a compare-and-swap loop and restored wholesale by
/// [`PermitBucket::refill`]. Unused permits never carry over into the next
/// window. Waiters park on an internal [`Notify`] that every refill wakes.
#[derive(Debug)]
pub struct PermitBucket {
    /// Maximum permits per window
    capacity: u64,
    /// Permits left in the current window
    available: AtomicU64,
    /// Number of refills applied since construction
    refills: AtomicU64,
    /// Wakes parked acquirers after a refill or shutdown
    refilled: Notify,
}

impl PermitBucket {
    /// Create a full bucket.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: AtomicU64::new(capacity),
            refills: AtomicU64::new(0),
            refilled: Notify::new(),
        }
    }

    /// Take one permit if any is left.
    ///
    /// The check and the decrement are a single atomic step, so concurrent
    /// callers can never take more than `capacity` permits between two
    /// refills and the counter never underflows.
    pub fn try_take(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }

    /// Reset the bucket to full capacity and wake every parked acquirer.
    pub fn refill(&self) {
        self.available.store(self.capacity, Ordering::Release);
        self.refills.fetch_add(1, Ordering::Relaxed);
        self.refilled.notify_waiters();
    }

    /// Wake every parked acquirer without touching the counter.
    pub fn wake_all(&self) {
        self.refilled.notify_waiters();
    }

    /// A future that completes on the next refill or wake-up.
    ///
    /// Call [`Notified::enable`] before checking availability so a refill
    /// racing with the check is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.refilled.notified()
    }

    /// Permits left in the current window.
    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }

    /// Maximum permits per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of refills applied so far.
    pub fn refill_count(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = PermitBucket::new(5);
        assert_eq!(bucket.available(), 5);
        assert_eq!(bucket.capacity(), 5);
        assert_eq!(bucket.refill_count(), 0);
    }

    #[test]
    fn test_try_take_until_empty() {
        let bucket = PermitBucket::new(3);

        for remaining in (0..3).rev() {
            assert!(bucket.try_take());
            assert_eq!(bucket.available(), remaining);
        }

        // Empty bucket stays at zero
        assert!(!bucket.try_take());
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_refill_is_a_hard_reset() {
        let bucket = PermitBucket::new(4);

        // Partially drained
        assert!(bucket.try_take());
        bucket.refill();
        assert_eq!(bucket.available(), 4);

        // Untouched bucket does not accumulate past capacity
        bucket.refill();
        assert_eq!(bucket.available(), 4);

        // Fully drained
        while bucket.try_take() {}
        bucket.refill();
        assert_eq!(bucket.available(), 4);
        assert_eq!(bucket.refill_count(), 3);
    }

    #[test]
    fn test_concurrent_takes_never_exceed_capacity() {
        let bucket = Arc::new(PermitBucket::new(100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || (0..50).filter(|_| bucket.try_take()).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(granted, 100);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_concurrent_takes_and_refills_stay_in_bounds() {
        let bucket = Arc::new(PermitBucket::new(10));

        let refiller = {
            let bucket = Arc::clone(&bucket);
            thread::spawn(move || {
                for _ in 0..200 {
                    bucket.refill();
                    assert!(bucket.available() <= 10);
                }
            })
        };

        let takers: Vec<_> = (0..4)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || {
                    for _ in 0..500 {
                        bucket.try_take();
                        assert!(bucket.available() <= 10);
                    }
                })
            })
            .collect();

        refiller.join().unwrap();
        for taker in takers {
            taker.join().unwrap();
        }

        assert!(bucket.available() <= 10);
        assert_eq!(bucket.refill_count(), 200);
    }
}
