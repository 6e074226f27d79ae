//! Candidate configurations for a linear operator chain.
//!
//! Every gap between two consecutive operators is either a materialization
//! cut or not, so a chain of `n` operators has `2^(n-1)` configurations. The
//! last operator always ends a level.

use quarry_core::error::{Error, Result};

use crate::level::{ChainStep, FailureModel, Level};

/// Longest chain we enumerate exhaustively.
pub const MAX_ENUMERATED_CHAIN: usize = 16;

pub fn enumerate_configurations(
    chain: &[ChainStep],
    model: &FailureModel,
) -> Result<Vec<Vec<Level>>> {
    if chain.is_empty() {
        return Ok(Vec::new());
    }
    if chain.len() > MAX_ENUMERATED_CHAIN {
        return Err(Error::Config(format!(
            "chain of {} operators is too long to enumerate (max {MAX_ENUMERATED_CHAIN})",
            chain.len()
        )));
    }

    let gaps = chain.len() - 1;
    let mut out = Vec::with_capacity(1 << gaps);
    for mask in 0u32..(1u32 << gaps) {
        let mut levels = Vec::new();
        let mut start = 0;
        for end in 0..chain.len() {
            let cut = end == gaps || mask & (1 << end) != 0;
            if cut {
                levels.push(Level::from_chain(&chain[start..=end], model)?);
                start = end + 1;
            }
        }
        out.push(levels);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::{assert_covers_chain, assert_probabilities};
    use quarry_core::id::OperatorId;

    fn chain(n: u64) -> Vec<ChainStep> {
        (1..=n)
            .map(|i| ChainStep {
                op: OperatorId::from_parts(&[1, i]),
                runtime: i as f64,
                mat_runtime: 0.5,
            })
            .collect()
    }

    #[test]
    fn every_cut_combination_is_produced() {
        let model = FailureModel::new(100.0, 1).unwrap();
        let steps = chain(4);
        let configs = enumerate_configurations(&steps, &model).unwrap();
        assert_eq!(configs.len(), 8);
        for c in &configs {
            assert_covers_chain(c, &steps);
            assert_probabilities(c);
        }
        // no cuts: one level; all cuts: one level per operator
        assert_eq!(configs[0].len(), 1);
        assert_eq!(configs[7].len(), 4);
    }

    #[test]
    fn overlong_chain_is_rejected() {
        let model = FailureModel::new(100.0, 1).unwrap();
        let steps = chain(MAX_ENUMERATED_CHAIN as u64 + 1);
        assert!(enumerate_configurations(&steps, &model).is_err());
    }
}
