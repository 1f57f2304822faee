//! Sequence numbers
//!
//! Every write gets a sequence number that is strictly greater than any
//! issued before it, including those issued by previous runs. Rebuild and
//! tombstone replay use it (never file ids or wall-clock order) to decide
//! which version of a key wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Strictly increasing, clock-derived sequence number source
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the floor so the next number is above `seen`
    pub fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }

    /// Issue the next sequence number: `max(last + 1, now)`
    pub fn next(&self) -> u64 {
        let now = Self::clock_nanos();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Last number issued or observed
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    fn clock_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_strictly_increasing() {
        let generator = SequenceGenerator::new();
        let mut prev = generator.next();
        for _ in 0..10_000 {
            let next = generator.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_observe_raises_floor() {
        let generator = SequenceGenerator::new();
        let far_future = u64::MAX / 2;
        generator.observe(far_future);
        assert_eq!(generator.next(), far_future + 1);
        assert_eq!(generator.last(), far_future + 1);
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || (0..1000).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
