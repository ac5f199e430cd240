//! Provider selection strategies (§4.6), one per service type, host-configured.
//!
//! Four strategies: `FIRST`, `ROUND_ROBIN`, `RANDOM`, and `WEIGHTED`
//! (reserved — accepted in config, not yet implemented).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    First,
    RoundRobin,
    Random,
    /// Reserved: accepted in configuration, falls back to `First` until
    /// per-provider weights have a place to live in the registry entry.
    Weighted,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::First
    }
}

/// Per-service-type round-robin cursor. Kept separate from the registry's
/// provider list so the list can be rebuilt freely without losing the cursor.
#[derive(Default)]
pub struct RoundRobinCursor(AtomicUsize);

impl RoundRobinCursor {
    pub fn next(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.0.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Pick one index out of `len` candidates per `strategy`. Ties and the
/// empty-candidate case are the caller's responsibility (§4.6: "returning an
/// error rather than silently picking an UNHEALTHY instance").
pub fn select_index(strategy: SelectionStrategy, len: usize, cursor: &RoundRobinCursor) -> usize {
    match strategy {
        SelectionStrategy::First | SelectionStrategy::Weighted => 0,
        SelectionStrategy::RoundRobin => cursor.next(len),
        SelectionStrategy::Random => {
            if len <= 1 {
                0
            } else {
                rand::thread_rng().gen_range(0..len)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_always_picks_zero() {
        let cursor = RoundRobinCursor::default();
        assert_eq!(select_index(SelectionStrategy::First, 3, &cursor), 0);
        assert_eq!(select_index(SelectionStrategy::First, 3, &cursor), 0);
    }

    #[test]
    fn round_robin_cycles() {
        let cursor = RoundRobinCursor::default();
        let picks: Vec<usize> = (0..4)
            .map(|_| select_index(SelectionStrategy::RoundRobin, 3, &cursor))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn random_stays_in_bounds() {
        let cursor = RoundRobinCursor::default();
        for _ in 0..50 {
            let idx = select_index(SelectionStrategy::Random, 5, &cursor);
            assert!(idx < 5);
        }
    }
}
