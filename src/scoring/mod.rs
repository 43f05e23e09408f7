//! Weighted scoring, EMA smoothing, and the halting policy.
//!
//! All scores are in [0, 1], higher is better. Signals are either present
//! with a normalized value or absent; normalization happens over only the
//! present subset, so the weight table never needs to sum to 1.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{HaltConfig, WeightsConfig};
use crate::error::{Error, Result};
use crate::parser::TestResults;

/// Minimum EMA gain that counts as an improvement for streak tracking.
pub const IMPROVEMENT_EPSILON: f64 = 1e-6;

/// The evaluation dimensions, in their fixed pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    DataQuality,
    Tests,
    Lint,
    Perf,
}

impl Signal {
    pub const EVALUATION_ORDER: [Signal; 4] =
        [Signal::DataQuality, Signal::Tests, Signal::Lint, Signal::Perf];

    /// The weight-table key for this signal.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::DataQuality => "data_quality",
            Signal::Tests => "test",
            Signal::Lint => "lint",
            Signal::Perf => "perf",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Signal::DataQuality => "Data quality",
            Signal::Tests => "Tests",
            Signal::Lint => "Lint",
            Signal::Perf => "Performance",
        }
    }
}

/// A present signal: a name and a normalized value in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReading {
    pub name: String,
    pub value: f64,
}

impl SignalReading {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Weighted average over the present signals.
///
/// Returns exactly 0.0 when no signal is present or every present signal
/// weighs zero — never divides by zero. Invalid weights or out-of-range
/// reading values are internal errors, fatal to the call.
pub fn calculate_weighted_score(
    readings: &[SignalReading],
    weights: &WeightsConfig,
) -> Result<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for reading in readings {
        if !reading.value.is_finite() || !(0.0..=1.0).contains(&reading.value) {
            return Err(Error::Internal(format!(
                "signal '{}' has out-of-range value {}",
                reading.name, reading.value
            )));
        }
        let weight = weights.weight(&reading.name);
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::Config(format!(
                "weight for signal '{}' must be finite and non-negative, got {weight}",
                reading.name
            )));
        }
        numerator += weight * reading.value;
        denominator += weight;
    }

    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok(numerator / denominator)
}

/// EMA update: the first observation is taken as-is.
pub fn update_ema(prev_ema: Option<f64>, current_score: f64, alpha: f64) -> f64 {
    match prev_ema {
        None => current_score,
        Some(prev) => alpha * current_score + (1.0 - alpha) * prev,
    }
}

/// Normalize a performance measurement against the best value seen so far
/// (lower runtime is better). The first observation is defined as 1.0; the
/// caller seeds and updates the best value after computing this ratio.
pub fn normalize_perf(best_known: Option<f64>, current: f64) -> f64 {
    match best_known {
        None => 1.0,
        Some(best) => (best / current).min(1.0),
    }
}

/// Fold one EMA observation into the best-score/streak pair.
///
/// Improvement means exceeding the best score by more than
/// [`IMPROVEMENT_EPSILON`]; anything else lengthens the streak.
pub fn update_improvement(best_score: f64, no_improve_streak: u32, ema_score: f64) -> (f64, u32) {
    if ema_score > best_score + IMPROVEMENT_EPSILON {
        (ema_score, 0)
    } else {
        (best_score, no_improve_streak + 1)
    }
}

/// Why iteration should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaltReason {
    /// Tests pass and the score cleared the threshold after `min_steps`.
    Success,
    /// No EMA improvement for `patience` consecutive steps.
    Plateau,
    /// The step limit was reached.
    Limit,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HaltReason::Success => "success",
            HaltReason::Plateau => "plateau",
            HaltReason::Limit => "limit",
        };
        write!(f, "{text}")
    }
}

/// Inputs to the halting policy for one completed step.
#[derive(Debug, Clone)]
pub struct HaltContext<'a> {
    /// The 1-based step this evaluation produced.
    pub step: u32,
    pub score: f64,
    pub tests: Option<&'a TestResults>,
    pub no_improve_streak: u32,
}

/// Evaluate the halting policy. Conditions are checked in declaration
/// order and every matching reason is reported; the result is true iff
/// any reason fired.
pub fn should_halt(ctx: &HaltContext<'_>, cfg: &HaltConfig) -> (bool, Vec<HaltReason>) {
    let mut reasons = Vec::new();

    let tests_green = ctx.tests.map_or(false, TestResults::all_passed);
    if ctx.step >= cfg.min_steps && tests_green && ctx.score >= cfg.pass_threshold {
        reasons.push(HaltReason::Success);
    }

    if ctx.no_improve_streak >= cfg.patience {
        reasons.push(HaltReason::Plateau);
    }

    if ctx.step >= cfg.max_steps {
        reasons.push(HaltReason::Limit);
    }

    (!reasons.is_empty(), reasons)
}
