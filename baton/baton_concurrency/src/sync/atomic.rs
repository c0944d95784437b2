//! Atomic flags.
//!
//! Lock-free state that only ever moves in one direction.

use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be set once and never cleared.
///
/// Used for monotonic state such as cancellation: readers never need a lock
/// to observe it, and setting it twice has the same effect as once.
#[derive(Debug, Default)]
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// Create a new, unset flag.
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Set the flag.
    ///
    /// Returns true if the flag was set by this call, false if it was already set.
    pub fn try_set(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Get the current state of the flag.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_flag() {
        let flag = AtomicFlag::new();
        assert!(!flag.is_set());

        assert!(flag.try_set());
        assert!(flag.is_set());

        // Idempotent: a second set reports that it did nothing
        assert!(!flag.try_set());
        assert!(flag.is_set());
    }

    #[test]
    fn test_atomic_flag_single_winner() {
        let flag = Arc::new(AtomicFlag::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flag = Arc::clone(&flag);
                thread::spawn(move || flag.try_set())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
