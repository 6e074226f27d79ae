//! Expected runtime of materialization configurations.
//!
//! For a level with `T = runtime + mat_runtime`, average wasted time `W`,
//! failure probability `F` and retry budget `r`:
//!
//! ```text
//! levelRunTime = T + W * ((1 - F^(r+1)) / (1 - F) - 1) + r * MTTR
//! ```
//!
//! The geometric factor counts the expected attempts beyond the first; at
//! `F = 1` it takes its limit `r + 1`. A configuration costs the sum of its
//! levels.

use quarry_core::error::{Error, Result};
use quarry_core::id::OperatorId;
use serde::{Deserialize, Serialize};

use crate::level::Level;

/// A scored configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedPlan {
    pub levels: Vec<Level>,
    pub runtime: f64,
}

/// Operators to materialize and the expected runtime that choice buys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub operators: Vec<OperatorId>,
    pub runtime: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimator {
    mttr_secs: f64,
}

impl CostEstimator {
    pub fn new(mttr_secs: f64) -> Result<Self> {
        if !(mttr_secs >= 0.0) || !mttr_secs.is_finite() {
            return Err(Error::Config(format!(
                "mttr must be a non-negative number of seconds, got {mttr_secs}"
            )));
        }
        Ok(Self { mttr_secs })
    }

    pub fn mttr_secs(&self) -> f64 {
        self.mttr_secs
    }

    pub fn level_run_time(&self, level: &Level) -> Result<f64> {
        level.validate()?;
        let t = level.runtime + level.mat_runtime;
        let w = level.avg_wasted();
        let f = level.failure_prob;
        let r = level.retries;
        let attempts = if f >= 1.0 {
            f64::from(r) + 1.0
        } else {
            (1.0 - f.powi(r as i32 + 1)) / (1.0 - f)
        };
        Ok(t + w * (attempts - 1.0) + f64::from(r) * self.mttr_secs)
    }

    pub fn estimate(&self, levels: Vec<Level>) -> Result<MaterializedPlan> {
        let mut runtime = 0.0;
        for level in &levels {
            runtime += self.level_run_time(level)?;
        }
        Ok(MaterializedPlan { levels, runtime })
    }

    /// Score every configuration, cheapest first. Ties keep input order.
    pub fn rank(&self, configurations: Vec<Vec<Level>>) -> Result<Vec<MaterializedPlan>> {
        let mut scored = configurations
            .into_iter()
            .map(|levels| self.estimate(levels))
            .collect::<Result<Vec<_>>>()?;
        scored.sort_by(|a, b| a.runtime.total_cmp(&b.runtime));
        Ok(scored)
    }

    /// Terminal operators of the cheapest configuration's levels.
    pub fn recommend(&self, configurations: Vec<Vec<Level>>) -> Result<Recommendation> {
        let best = self
            .rank(configurations)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config("no materialization configuration to rank".into()))?;
        Ok(Recommendation {
            operators: best
                .levels
                .iter()
                .filter_map(|l| l.terminal().cloned())
                .collect(),
            runtime: best.runtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(ops: &[u64], runtime: f64, mat: f64, f: f64, r: u32) -> Level {
        Level::new(
            ops.iter().map(|o| OperatorId::from_parts(&[1, *o])).collect(),
            runtime,
            mat,
            f,
            r,
        )
    }

    #[test]
    fn no_failure_costs_runtime_plus_recovery_budget() {
        let est = CostEstimator::new(5.0).unwrap();
        let rt = est.level_run_time(&level(&[1], 10.0, 2.0, 0.0, 2)).unwrap();
        assert!((rt - (12.0 + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn certain_failure_uses_the_limit() {
        let est = CostEstimator::new(0.0).unwrap();
        // W = 0.5 * 12 * 1 = 6; attempts = r + 1 = 3; 12 + 6 * 2 = 24
        let rt = est.level_run_time(&level(&[1], 10.0, 2.0, 1.0, 2)).unwrap();
        assert!((rt - 24.0).abs() < 1e-9);
    }

    #[test]
    fn closed_form_matches_series() {
        let est = CostEstimator::new(1.0).unwrap();
        let (f, r) = (0.3_f64, 3u32);
        let lvl = level(&[1], 8.0, 2.0, f, r);
        let series: f64 = (1..=r).map(|k| f.powi(k as i32)).sum();
        let expected = 10.0 + lvl.avg_wasted() * series + f64::from(r);
        assert!((est.level_run_time(&lvl).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn recommendation_picks_cheapest_configuration() {
        let est = CostEstimator::new(1.0).unwrap();
        let cheap = vec![level(&[1, 2], 5.0, 1.0, 0.1, 1)];
        let pricey = vec![level(&[1], 5.0, 50.0, 0.1, 1), level(&[2], 1.0, 1.0, 0.1, 1)];
        let rec = est.recommend(vec![pricey, cheap]).unwrap();
        assert_eq!(rec.operators, vec![OperatorId::from_parts(&[1, 2])]);

        let ranked = est
            .rank(vec![vec![level(&[1], 9.0, 0.0, 0.0, 0)], vec![level(&[1], 1.0, 0.0, 0.0, 0)]])
            .unwrap();
        assert!(ranked[0].runtime <= ranked[1].runtime);
        assert!(est.recommend(vec![]).is_err());
    }
}
