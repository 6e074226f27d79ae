//! Levels: the unit the fault-cost model scores.

use quarry_core::error::{Error, Result};
use quarry_core::id::OperatorId;
use serde::{Deserialize, Serialize};

/// Runtime estimate for one operator of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub op: OperatorId,
    /// Seconds to compute this operator from its inputs.
    pub runtime: f64,
    /// Extra seconds to persist its result if a level ends here.
    pub mat_runtime: f64,
}

/// Turns a level's duration into a failure probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailureModel {
    /// Mean time between failures of the cluster, seconds.
    pub mtbf_secs: f64,
    /// Retry attempts granted to every level.
    pub retries: u32,
}

impl FailureModel {
    pub fn new(mtbf_secs: f64, retries: u32) -> Result<Self> {
        if !(mtbf_secs > 0.0) || !mtbf_secs.is_finite() {
            return Err(Error::Config(format!(
                "mtbf must be a positive number of seconds, got {mtbf_secs}"
            )));
        }
        Ok(Self { mtbf_secs, retries })
    }

    /// Probability that a run of `secs` seconds sees at least one failure
    /// (exponential inter-failure times).
    pub fn probability(&self, secs: f64) -> f64 {
        1.0 - (-secs / self.mtbf_secs).exp()
    }
}

/// One sub-query of a materialization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Operators of the sub-query, bottom-up; the last one is materialized.
    pub operators: Vec<OperatorId>,
    /// Cost without failures, seconds.
    pub runtime: f64,
    /// Cost of persisting the level's result, seconds.
    pub mat_runtime: f64,
    pub failure_prob: f64,
    pub retries: u32,
}

impl Level {
    pub fn new(
        operators: Vec<OperatorId>,
        runtime: f64,
        mat_runtime: f64,
        failure_prob: f64,
        retries: u32,
    ) -> Self {
        Self {
            operators,
            runtime,
            mat_runtime,
            failure_prob,
            retries,
        }
    }

    /// Collapse consecutive chain steps into one level ending at the last step.
    pub fn from_chain(steps: &[ChainStep], model: &FailureModel) -> Result<Self> {
        let last = steps
            .last()
            .ok_or_else(|| Error::Config("a level needs at least one operator".into()))?;
        let runtime: f64 = steps.iter().map(|s| s.runtime).sum();
        let mat_runtime = last.mat_runtime;
        Ok(Self {
            operators: steps.iter().map(|s| s.op.clone()).collect(),
            runtime,
            mat_runtime,
            failure_prob: model.probability(runtime + mat_runtime),
            retries: model.retries,
        })
    }

    /// Operator whose result this level materializes.
    pub fn terminal(&self) -> Option<&OperatorId> {
        self.operators.last()
    }

    /// Average time lost when the level fails once.
    pub fn avg_wasted(&self) -> f64 {
        0.5 * (self.runtime + self.mat_runtime) * self.failure_prob
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_prob) {
            return Err(Error::Config(format!(
                "failure probability must be in [0, 1], got {}",
                self.failure_prob
            )));
        }
        if !(self.runtime >= 0.0) || !(self.mat_runtime >= 0.0) {
            return Err(Error::Config(format!(
                "level times must be non-negative, got runtime {} and materialization {}",
                self.runtime, self.mat_runtime
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasted_time_is_half_the_level_scaled_by_failure() {
        let level = Level::new(vec![OperatorId::from_parts(&[1, 1])], 10.0, 2.0, 0.5, 1);
        assert!((level.avg_wasted() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn from_chain_sums_runtimes_and_keeps_last_materialization() {
        let model = FailureModel::new(1000.0, 2).unwrap();
        let steps = vec![
            ChainStep {
                op: OperatorId::from_parts(&[1, 1]),
                runtime: 4.0,
                mat_runtime: 100.0,
            },
            ChainStep {
                op: OperatorId::from_parts(&[1, 2]),
                runtime: 6.0,
                mat_runtime: 1.0,
            },
        ];
        let level = Level::from_chain(&steps, &model).unwrap();
        assert_eq!(level.runtime, 10.0);
        assert_eq!(level.mat_runtime, 1.0);
        assert_eq!(level.terminal(), Some(&OperatorId::from_parts(&[1, 2])));
        assert!(level.failure_prob > 0.0 && level.failure_prob < 1.0);
        assert_eq!(level.retries, 2);
    }

    #[test]
    fn out_of_range_inputs_are_rejected() {
        assert!(FailureModel::new(0.0, 1).is_err());
        let level = Level::new(vec![], 1.0, 0.0, 1.5, 0);
        assert!(level.validate().is_err());
        let level = Level::new(vec![], -1.0, 0.0, 0.5, 0);
        assert!(level.validate().is_err());
    }
}
