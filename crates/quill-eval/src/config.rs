//! Engine limits and defaults.

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

/// Limits and tuning knobs for one [`Evaluator`](crate::Evaluator).
///
/// Every limit, when exceeded, produces a runtime exception value rather
/// than a host error. Missing fields in JSON take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps allowed in a single evaluation pass.
    pub max_steps: usize,
    /// Frames allowed on the stack at once, the root frame included.
    pub max_call_depth: usize,
    /// Times any single function or structure may be evaluated in one pass.
    pub max_evaluations_per_function: usize,
    /// Steps between replay snapshots.
    pub snapshot_interval: usize,
    /// Frequency of `Time()` streams created without one, in milliseconds.
    pub time_frequency_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 500_000,
            max_call_depth: 256,
            max_evaluations_per_function: 100_000,
            snapshot_interval: 64,
            time_frequency_ms: 33.0,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> EvalResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> EvalResult<()> {
        if self.snapshot_interval == 0 {
            return Err(EvalError::InvalidConfig(
                "snapshot_interval must be at least 1".into(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(EvalError::InvalidConfig(
                "max_call_depth must be at least 1".into(),
            ));
        }
        if self.time_frequency_ms.is_nan() || self.time_frequency_ms < 0.0 {
            return Err(EvalError::InvalidConfig(
                "time_frequency_ms must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}
