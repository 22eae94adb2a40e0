use std::sync::atomic::{AtomicU64, Ordering};

use foundation::ids::Generation;

/// Hands out generation tokens and answers "is this still the newest cycle?".
///
/// Shared between the session actor (which advances it) and the cycle tasks
/// (which check it at each resumption point before doing more work).
#[derive(Debug, Default)]
pub struct GenerationClock {
    current: AtomicU64,
}

impl GenerationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new cycle; every previously issued generation becomes stale.
    pub fn advance(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation != Generation::NONE && self.current() == generation
    }

    pub fn is_stale(&self, generation: Generation) -> bool {
        !self.is_current(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationClock;
    use foundation::ids::Generation;

    #[test]
    fn advance_is_strictly_increasing() {
        let clock = GenerationClock::new();
        assert_eq!(clock.current(), Generation::NONE);
        let a = clock.advance();
        let b = clock.advance();
        assert!(b > a);
        assert!(clock.is_current(b));
        assert!(clock.is_stale(a));
    }

    #[test]
    fn none_is_never_current() {
        let clock = GenerationClock::new();
        assert!(!clock.is_current(Generation::NONE));
    }
}
