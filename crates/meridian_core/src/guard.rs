//! One-shot guards for per-connection actions.

use std::sync::atomic::{AtomicBool, Ordering};

/// Atomic "already in progress" flag.
///
/// Used for actions that must not run twice concurrently for one connection,
/// such as a login being processed while a duplicate request arrives.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the guard. Returns `false` if it was already claimed.
    pub fn try_begin(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the guard. Returns `false` if it was not claimed.
    pub fn finish(&self) -> bool {
        self.busy
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn only_one_claim_succeeds() {
        let guard = InFlight::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(guard.finish());
        assert!(!guard.finish());
        assert!(guard.try_begin());
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        let guard = Arc::new(InFlight::new());
        let winners: usize = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.try_begin() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
    }
}
