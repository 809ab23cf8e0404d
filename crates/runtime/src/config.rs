// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend configuration loaded from TOML files, harness key/value pairs,
//! or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! accelerator = "npu"
//! num_threads = 4
//! batch_size = 8
//! shards_num = 4
//! mode = "sharded"
//! memory_budget = "256M"
//! ```
//!
//! Pipelined mode replaces sharding with a slot pool:
//! ```toml
//! mode = "pipelined"
//! batch_size = 32
//! fast_slots = 3
//! slow_slots = 1
//! admission = "fast-first"
//! poll_timeout_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use memory_manager::MemoryBudget;
use shard_planner::{admission, AdmissionPolicy, BatchLayout, SlotPlan};

use crate::RuntimeError;

/// Accelerator every factory is expected to support.
pub const CPU_ACCELERATOR: &str = "cpu";

/// How a batch is mapped onto the resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One unit per shard, all shards run once in parallel and join.
    #[default]
    Sharded,
    /// Bounded fast/slow slot pool refilled as samples complete.
    Pipelined,
}

impl ExecutionMode {
    pub fn parse(s: &str) -> Result<Self, RuntimeError> {
        match s.to_lowercase().as_str() {
            "sharded" | "static" => Ok(Self::Sharded),
            "pipelined" | "pipeline" => Ok(Self::Pipelined),
            other => Err(RuntimeError::ConfigError(format!(
                "unknown mode '{other}'; expected 'sharded' or 'pipelined'"
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sharded => write!(f, "sharded"),
            Self::Pipelined => write!(f, "pipelined"),
        }
    }
}

/// Configuration for one backend instance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Accelerator requested from the unit factory.
    pub accelerator: String,
    /// Intra-op threads per unit (defaults to number of online CPU cores).
    pub num_threads: Option<usize>,
    /// Samples per logical batch.
    pub batch_size: usize,
    /// Explicit shard count; see [`BatchLayout::resolve`] for the default.
    pub shards_num: Option<usize>,
    /// Static sharding or pipelined slots.
    pub mode: ExecutionMode,
    /// Fast-class slots in pipelined mode.
    pub fast_slots: usize,
    /// Slow-class slots in pipelined mode.
    pub slow_slots: usize,
    /// Completion deadline for a pipelined batch.
    pub poll_timeout_ms: u64,
    /// Admission policy name for pipelined mode.
    pub admission: String,
    /// Memory budget for every buffer the backend owns (e.g. `"256M"`).
    pub memory_budget: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            accelerator: CPU_ACCELERATOR.to_string(),
            num_threads: None,
            batch_size: 1,
            shards_num: None,
            mode: ExecutionMode::Sharded,
            fast_slots: 1,
            slow_slots: 0,
            poll_timeout_ms: 2000,
            admission: "fast-first".to_string(),
            memory_budget: "256M".to_string(),
        }
    }
}

impl BackendConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Builds a configuration from the harness's opaque key/value list.
    ///
    /// Unknown keys are logged and ignored. Values that fail to parse are
    /// errors.
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self, RuntimeError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "accelerator" => config.accelerator = value.to_string(),
                "num_threads" => config.num_threads = Some(parse_number(key, value)?),
                "batch_size" => config.batch_size = parse_number(key, value)?,
                "shards_num" => config.shards_num = Some(parse_number(key, value)?),
                "mode" => config.mode = ExecutionMode::parse(value)?,
                "fast_slots" => config.fast_slots = parse_number(key, value)?,
                "slow_slots" => config.slow_slots = parse_number(key, value)?,
                "poll_timeout_ms" => config.poll_timeout_ms = parse_number(key, value)?,
                "admission" => config.admission = value.to_string(),
                "memory_budget" => config.memory_budget = value.to_string(),
                other => tracing::warn!("ignoring unknown configuration key '{other}'"),
            }
        }
        Ok(config)
    }

    /// Checks the configuration before anything is allocated.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.accelerator.trim().is_empty() {
            return Err(RuntimeError::ConfigError("accelerator must not be empty".into()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(RuntimeError::ConfigError("poll_timeout_ms must be non-zero".into()));
        }
        self.parse_budget()?;

        match self.mode {
            ExecutionMode::Sharded => {
                self.layout()?;
            }
            ExecutionMode::Pipelined => {
                if self.batch_size == 0 {
                    return Err(shard_planner::PlannerError::ZeroBatch.into());
                }
                self.create_policy()?;
                if self.shards_num.is_some() {
                    tracing::warn!("shards_num is ignored in pipelined mode");
                }
            }
        }
        Ok(())
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Resolves the static sharding layout.
    pub fn layout(&self) -> Result<BatchLayout, RuntimeError> {
        Ok(BatchLayout::resolve(self.batch_size, self.shards_num)?)
    }

    /// Resolves the pipelined slot plan.
    pub fn slot_plan(&self) -> Result<SlotPlan, RuntimeError> {
        Ok(SlotPlan::new(self.fast_slots, self.slow_slots)?)
    }

    /// Creates the admission policy for pipelined mode.
    pub fn create_policy(&self) -> Result<Box<dyn AdmissionPolicy>, RuntimeError> {
        Ok(admission::from_name(
            &self.admission.to_lowercase(),
            &self.slot_plan()?,
        )?)
    }

    /// Resolves the number of intra-op threads per unit.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RuntimeError> {
    value
        .parse()
        .map_err(|_| RuntimeError::ConfigError(format!("invalid value '{value}' for '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = BackendConfig::default();
        assert_eq!(c.accelerator, "cpu");
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.mode, ExecutionMode::Sharded);
        c.validate().unwrap();
        assert_eq!(c.layout().unwrap().shard_count(), 1);
    }

    #[test]
    fn test_default_shards_for_multi_sample_batch() {
        let c = BackendConfig {
            batch_size: 4,
            ..Default::default()
        };
        let layout = c.layout().unwrap();
        assert_eq!(layout.shard_count(), 2);
        assert_eq!(layout.real_batch_size(), 2);
    }

    #[test]
    fn test_indivisible_batch_rejected() {
        let c = BackendConfig {
            batch_size: 6,
            shards_num: Some(4),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(RuntimeError::PlannerError(_))));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
accelerator = "npu"
batch_size = 8
shards_num = 4
num_threads = 2
memory_budget = "64M"
"#;
        let c = BackendConfig::from_toml(toml).unwrap();
        assert_eq!(c.accelerator, "npu");
        assert_eq!(c.batch_size, 8);
        assert_eq!(c.shards_num, Some(4));
        assert_eq!(c.num_threads, Some(2));
        assert_eq!(c.parse_budget().unwrap().as_mb(), 64);
        assert_eq!(c.mode, ExecutionMode::Sharded);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = BackendConfig {
            mode: ExecutionMode::Pipelined,
            fast_slots: 3,
            slow_slots: 1,
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = BackendConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_from_pairs() {
        let c = BackendConfig::from_pairs(&[
            ("accelerator", "gpu"),
            ("batch_size", "12"),
            ("shards_num", "3"),
            ("mode", "pipelined"),
            ("fast_slots", "4"),
            ("slow_slots", "2"),
            ("admission", "weighted-round-robin"),
            ("poll_timeout_ms", "150"),
            ("bogus_key", "ignored"),
        ])
        .unwrap();
        assert_eq!(c.accelerator, "gpu");
        assert_eq!(c.batch_size, 12);
        assert_eq!(c.shards_num, Some(3));
        assert_eq!(c.mode, ExecutionMode::Pipelined);
        assert_eq!(c.slot_plan().unwrap().total(), 6);
        assert_eq!(c.poll_timeout(), Duration::from_millis(150));
        assert_eq!(c.create_policy().unwrap().name(), "weighted-round-robin");
    }

    #[test]
    fn test_from_pairs_bad_number() {
        let err = BackendConfig::from_pairs(&[("batch_size", "many")]).unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(BackendConfig::from_pairs(&[("mode", "turbo")]).is_err());
    }

    #[test]
    fn test_pipelined_without_fast_slots_rejected() {
        let c = BackendConfig {
            mode: ExecutionMode::Pipelined,
            batch_size: 4,
            fast_slots: 0,
            slow_slots: 2,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_pipelined_ignores_divisibility() {
        let c = BackendConfig {
            mode: ExecutionMode::Pipelined,
            batch_size: 7,
            fast_slots: 3,
            ..Default::default()
        };
        c.validate().unwrap();
    }

    #[test]
    fn test_unknown_admission_rejected() {
        let c = BackendConfig {
            mode: ExecutionMode::Pipelined,
            admission: "lottery".into(),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(RuntimeError::PlannerError(_))));
    }

    #[test]
    fn test_bad_budget_rejected() {
        let c = BackendConfig {
            memory_budget: "lots".into(),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(RuntimeError::ConfigError(_))));
    }

    #[test]
    fn test_resolve_threads() {
        let c = BackendConfig {
            num_threads: Some(8),
            ..Default::default()
        };
        assert_eq!(c.resolve_threads(), 8);
        assert!(BackendConfig::default().resolve_threads() >= 1);
    }
}
