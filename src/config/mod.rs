//! Session configuration: signal weights, halting policy, and check commands.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::parser::TestFramework;
use crate::scoring::Signal;

/// Default smoothing factor for the EMA score trajectory.
pub const DEFAULT_EMA_ALPHA: f64 = 0.9;

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Named, non-negative weights, one per evaluable signal.
///
/// The set is extensible: any signal name may carry a weight, and a missing
/// name means weight zero. Weights need not sum to 1 — normalization happens
/// at scoring time over only the signals actually present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightsConfig(BTreeMap<String, f64>);

impl Default for WeightsConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(Signal::DataQuality.name().to_string(), 0.3);
        weights.insert(Signal::Tests.name().to_string(), 0.4);
        weights.insert(Signal::Lint.name().to_string(), 0.1);
        weights.insert(Signal::Perf.name().to_string(), 0.2);
        Self(weights)
    }
}

impl WeightsConfig {
    /// Create an empty weight table (every signal weighs zero).
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Weight for a signal name; unknown names weigh zero.
    pub fn weight(&self, signal: &str) -> f64 {
        self.0.get(signal).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, signal: impl Into<String>, weight: f64) -> &mut Self {
        self.0.insert(signal.into(), weight);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, weight) in &self.0 {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::Config(format!(
                    "weight for signal '{name}' must be finite and non-negative, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Halting policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltConfig {
    /// Hard iteration limit.
    pub max_steps: u32,
    /// Score threshold for the success condition.
    pub pass_threshold: f64,
    /// Non-improving EMA updates tolerated before the plateau condition fires.
    pub patience: u32,
    /// Minimum steps before the success condition may fire.
    #[serde(default = "default_min_steps")]
    pub min_steps: u32,
}

fn default_min_steps() -> u32 {
    1
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            pass_threshold: 0.95,
            patience: 3,
            min_steps: 1,
        }
    }
}

impl HaltConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(Error::Config(format!(
                "pass_threshold must be in [0, 1], got {}",
                self.pass_threshold
            )));
        }
        if self.min_steps > self.max_steps {
            return Err(Error::Config(format!(
                "min_steps ({}) must not exceed max_steps ({})",
                self.min_steps, self.max_steps
            )));
        }
        Ok(())
    }
}

/// Immutable per-session evaluation configuration.
///
/// An absent or empty command string means the corresponding signal is not
/// configured: the runner is never invoked for it and the signal stays
/// absent, which is distinct from "configured but failed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Working directory the checks run against.
    pub repo_path: PathBuf,
    #[serde(default)]
    pub data_quality_cmd: Option<String>,
    #[serde(default)]
    pub test_cmd: Option<String>,
    #[serde(default)]
    pub lint_cmd: Option<String>,
    #[serde(default)]
    pub perf_cmd: Option<String>,
    /// Per-command timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub halt: HaltConfig,
    /// EMA smoothing factor, in (0, 1]. Higher weighs recent scores more.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// Parser hint for test output.
    #[serde(default)]
    pub test_framework: TestFramework,
    /// When true (default), a test run with `total == 0` still counts as a
    /// present signal with value 0. When false, it is treated as absent.
    #[serde(default = "default_true")]
    pub score_empty_test_runs: bool,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_ema_alpha() -> f64 {
    DEFAULT_EMA_ALPHA
}

fn default_true() -> bool {
    true
}

impl EvalConfig {
    /// Minimal configuration for a working directory, everything else default.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            data_quality_cmd: None,
            test_cmd: None,
            lint_cmd: None,
            perf_cmd: None,
            timeout: DEFAULT_TIMEOUT,
            weights: WeightsConfig::default(),
            halt: HaltConfig::default(),
            ema_alpha: DEFAULT_EMA_ALPHA,
            test_framework: TestFramework::default(),
            score_empty_test_runs: true,
        }
    }

    /// The configured command for a signal, or `None` when the signal is
    /// unconfigured (absent or blank).
    pub fn command(&self, signal: Signal) -> Option<&str> {
        let cmd = match signal {
            Signal::DataQuality => self.data_quality_cmd.as_deref(),
            Signal::Tests => self.test_cmd.as_deref(),
            Signal::Lint => self.lint_cmd.as_deref(),
            Signal::Perf => self.perf_cmd.as_deref(),
        };
        cmd.map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.halt.validate()?;
        if !self.ema_alpha.is_finite() || self.ema_alpha <= 0.0 || self.ema_alpha > 1.0 {
            return Err(Error::Config(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }
        if self.repo_path.as_os_str().is_empty() {
            return Err(Error::Config("repo_path must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_cover_all_signals() {
        let weights = WeightsConfig::default();
        for signal in Signal::EVALUATION_ORDER {
            assert!(weights.weight(signal.name()) > 0.0, "{signal:?}");
        }
        assert_eq!(weights.weight("unknown"), 0.0);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn negative_or_nan_weights_are_rejected() {
        let mut weights = WeightsConfig::default();
        weights.set("test", -0.1);
        assert!(weights.validate().is_err());

        let mut weights = WeightsConfig::default();
        weights.set("perf", f64::NAN);
        assert!(weights.validate().is_err());
    }

    #[test]
    fn halt_config_bounds() {
        assert!(HaltConfig::default().validate().is_ok());

        let zero_max = HaltConfig {
            max_steps: 0,
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());

        let bad_threshold = HaltConfig {
            pass_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let min_over_max = HaltConfig {
            max_steps: 3,
            min_steps: 4,
            ..Default::default()
        };
        assert!(min_over_max.validate().is_err());
    }

    #[test]
    fn blank_command_is_unconfigured() {
        let mut cfg = EvalConfig::new("/tmp/repo");
        cfg.test_cmd = Some("   ".to_string());
        cfg.lint_cmd = Some("ruff check .".to_string());

        assert_eq!(cfg.command(Signal::Tests), None);
        assert_eq!(cfg.command(Signal::DataQuality), None);
        assert_eq!(cfg.command(Signal::Lint), Some("ruff check ."));
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let mut cfg = EvalConfig::new("/tmp/repo");
        cfg.ema_alpha = 0.0;
        assert!(cfg.validate().is_err());
        cfg.ema_alpha = 1.0;
        assert!(cfg.validate().is_ok());
        cfg.ema_alpha = 1.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut cfg = EvalConfig::new("/work/project");
        cfg.test_cmd = Some("pytest -q".to_string());
        cfg.halt.max_steps = 5;

        let json = serde_json::to_string(&cfg).unwrap();
        let back: EvalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
