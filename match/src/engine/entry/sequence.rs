//! Monotonic id generation
//!
//! Order ids, arrival sequence numbers and trade ids are all drawn from
//! `Sequence` counters. Values start at 1 and never repeat within a process;
//! after a restart the counters resume above the persisted high watermarks.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Sequence {
    last: AtomicU64,
}

impl Sequence {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a counter whose first issued value is `last + 1`
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = Sequence::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.last(), 2);
    }

    #[test]
    fn test_resumes_after_watermark() {
        let seq = Sequence::starting_after(10);
        assert_eq!(seq.last(), 10);
        assert_eq!(seq.next(), 11);
    }
}
