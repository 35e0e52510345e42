//! Cooperative shutdown flag shared by every virtual client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write-once-true flag marking dataset exhaustion (or a run-time limit).
///
/// Clones share the same flag. Nothing ever blocks on it; callers poll
/// [`CompletionSignal::is_raised`] at their checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    raised: Arc<AtomicBool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn raise(&self) -> bool {
        !self.raised.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_is_idempotent() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_raised());
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(signal.is_raised());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = CompletionSignal::new();
        let observer = signal.clone();
        signal.raise();
        assert!(observer.is_raised());
    }

    #[test]
    fn test_only_one_thread_wins_the_raise() {
        let signal = CompletionSignal::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = signal.clone();
                std::thread::spawn(move || s.raise())
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
