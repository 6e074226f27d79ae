//! Debug-time verification helpers for materialization configurations.
//!
//! These are for tests and debug builds; they panic on violation.

use crate::level::{ChainStep, Level};

/// Levels must cover `chain` in order, each operator exactly once, with no
/// empty level.
pub fn assert_covers_chain(levels: &[Level], chain: &[ChainStep]) {
    let mut pos = 0;
    for (i, level) in levels.iter().enumerate() {
        assert!(!level.operators.is_empty(), "level {i} is empty");
        for op in &level.operators {
            assert!(
                pos < chain.len() && &chain[pos].op == op,
                "level {i} lists {op} out of chain order"
            );
            pos += 1;
        }
    }
    assert_eq!(pos, chain.len(), "levels cover {pos} of {} operators", chain.len());
}

/// Every level's failure probability lies in `[0, 1]`.
pub fn assert_probabilities(levels: &[Level]) {
    for (i, level) in levels.iter().enumerate() {
        assert!(
            (0.0..=1.0).contains(&level.failure_prob),
            "level {i} has failure probability {}",
            level.failure_prob
        );
    }
}
