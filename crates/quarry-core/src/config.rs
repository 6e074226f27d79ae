//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduling policy name understood by `quarry_exec::policy_from_config`
    /// (`"simple"` or `"wishlist"`).
    pub scheduling_policy: String,

    /// Compute slots requested per tracker unit (oversubscription factor).
    pub slots_per_unit: usize,

    /// Mean time to recovery (seconds) charged per retry by the fault-cost model.
    pub mttr_secs: f64,

    /// How often the health monitor pings deployed units.
    pub monitor_interval_ms: u64,

    /// Address the tracker node listens on.
    pub tracker_host: String,
    pub tracker_port: u16,

    /// Address of the master coordinator.
    pub coordinator_url: String,

    /// Slots advertised by a compute node when none are given explicitly.
    pub compute_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling_policy: "simple".to_string(),
            slots_per_unit: 1,
            mttr_secs: 30.0,
            monitor_interval_ms: 5_000,
            tracker_host: "127.0.0.1".to_string(),
            tracker_port: 5400,
            coordinator_url: "127.0.0.1:5300".to_string(),
            compute_slots: 4,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `QUARRY_SCHEDULING_POLICY`: `simple` or `wishlist`
    /// - `QUARRY_SLOTS_PER_UNIT`: slots requested per unit
    /// - `QUARRY_MTTR_SECS`: mean time to recovery for the cost model
    /// - `QUARRY_MONITOR_INTERVAL_MS`: health monitor period
    /// - `QUARRY_TRACKER_HOST` / `QUARRY_TRACKER_PORT`: tracker listen address
    /// - `QUARRY_COORDINATOR_URL`: master coordinator address
    /// - `QUARRY_COMPUTE_SLOTS`: default slots per compute node
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("QUARRY_SCHEDULING_POLICY") {
            cfg.scheduling_policy = s;
        }

        if let Ok(s) = std::env::var("QUARRY_SLOTS_PER_UNIT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.slots_per_unit = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_MTTR_SECS") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.mttr_secs = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_MONITOR_INTERVAL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.monitor_interval_ms = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_TRACKER_HOST") {
            cfg.tracker_host = s;
        }

        if let Ok(s) = std::env::var("QUARRY_TRACKER_PORT") {
            if let Ok(v) = s.parse::<u16>() {
                cfg.tracker_port = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_COORDINATOR_URL") {
            cfg.coordinator_url = s;
        }

        if let Ok(s) = std::env::var("QUARRY_COMPUTE_SLOTS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.compute_slots = v;
            }
        }

        cfg
    }

    /// Reject values the scheduler or cost model cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.slots_per_unit == 0 {
            return Err(Error::Config("slots_per_unit must be at least 1".into()));
        }
        if !self.mttr_secs.is_finite() || self.mttr_secs < 0.0 {
            return Err(Error::Config(format!(
                "mttr_secs must be a non-negative number, got {}",
                self.mttr_secs
            )));
        }
        if self.scheduling_policy.trim().is_empty() {
            return Err(Error::Config("scheduling_policy is empty".into()));
        }
        Ok(())
    }

    /// `host:port` the tracker node becomes reachable at.
    pub fn tracker_url(&self) -> String {
        format!("{}:{}", self.tracker_host, self.tracker_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.tracker_url(), "127.0.0.1:5400");
    }

    #[test]
    fn zero_slots_per_unit_rejected() {
        let cfg = EngineConfig {
            slots_per_unit: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig {
            scheduling_policy: "wishlist".into(),
            ..Default::default()
        };
        let s = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, cfg);
    }
}
