//! The evaluation pipeline: runs configured checks in fixed order, scores
//! the signals, evaluates the halting policy, and commits the step to the
//! session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::parser::{self, PerfResults, TestResults};
use crate::scoring::{self, HaltContext, Signal, SignalReading};
use crate::session::{EvalResult, SessionHandle, SessionState};
use crate::subprocess::{CommandResult, SubprocessManager};

/// Timeout for `command -v` lookups during preflight.
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EvaluationPipeline {
    subprocess: SubprocessManager,
}

impl EvaluationPipeline {
    pub fn new(subprocess: SubprocessManager) -> Self {
        Self { subprocess }
    }

    pub fn production() -> Self {
        Self::new(SubprocessManager::production())
    }

    /// Run one evaluation under the session's exclusive execution lock.
    ///
    /// This is the entry point for callers holding a store handle: a second
    /// run for the same session cannot start until this one has fully
    /// completed, while runs for other sessions proceed in parallel.
    pub async fn run_session(&self, handle: &SessionHandle) -> Result<EvalResult> {
        let mut state = handle.lock().await;
        self.run(&mut state).await
    }

    /// Run the full evaluation for the session's current on-disk state.
    ///
    /// Signal order is fixed: data quality, tests, lint, performance.
    /// Unconfigured signals are skipped entirely; every configured signal
    /// produces exactly one feedback line whether or not its output parsed.
    /// A failing or timed-out command is a failing observation for that one
    /// signal only. On success the step commits atomically: `step` moves by
    /// exactly 1 even when every configured command failed. Configuration
    /// errors abort before any command runs and leave the session unchanged.
    pub async fn run(&self, session: &mut SessionState) -> Result<EvalResult> {
        session.cfg.validate()?;

        let cwd = session.cfg.repo_path.clone();
        let timeout = session.cfg.timeout;

        let mut ok_data_quality = None;
        let mut tests: Option<TestResults> = None;
        let mut ok_lint = None;
        let mut perf: Option<PerfResults> = None;
        let mut feedback = Vec::new();

        for signal in Signal::EVALUATION_ORDER {
            let Some(cmd) = session.cfg.command(signal) else {
                continue;
            };
            let result = self.subprocess.shell(cmd, &cwd, timeout).await;

            match signal {
                Signal::DataQuality => {
                    ok_data_quality = Some(result.ok);
                    feedback.push(if result.ok {
                        "✅ Data quality passed".to_string()
                    } else {
                        format!("❌ Data quality: {}", failure_snippet(&result))
                    });
                }
                Signal::Tests => {
                    tests = parser::parse_test_output(
                        &result.combined_output(),
                        session.cfg.test_framework,
                    );
                    feedback.push(match &tests {
                        Some(t) if t.failed > 0 => {
                            format!("❌ Tests: {}/{} failed", t.failed, t.total)
                        }
                        Some(t) if t.total == 0 => "⚠️ Tests: nothing ran".to_string(),
                        Some(t) => format!("✅ Tests: {}/{} passed", t.passed, t.total),
                        None => format!(
                            "⚠️ Tests: could not parse test output (exit code {})",
                            result.exit_code
                        ),
                    });
                }
                Signal::Lint => {
                    ok_lint = Some(result.ok);
                    feedback.push(if result.ok {
                        "✅ Lint passed".to_string()
                    } else {
                        format!("❌ Lint errors: {}", failure_tail(&result))
                    });
                }
                Signal::Perf => {
                    perf = parser::parse_performance_metric(&result.combined_output());
                    feedback.push(match &perf {
                        Some(m) => perf_feedback(m, session.best_perf),
                        None => format!(
                            "⚠️ Performance: no metric found in output (exit code {})",
                            result.exit_code
                        ),
                    });
                }
            }
        }

        let mut readings = Vec::new();
        if let Some(ok) = ok_data_quality {
            readings.push(SignalReading::new(
                Signal::DataQuality.name(),
                if ok { 1.0 } else { 0.0 },
            ));
        }
        if let Some(t) = &tests {
            match t.pass_rate() {
                Some(rate) => readings.push(SignalReading::new(Signal::Tests.name(), rate)),
                // A zero-total run still counts as a present signal with
                // value 0 unless the session opts out.
                None if session.cfg.score_empty_test_runs => {
                    readings.push(SignalReading::new(Signal::Tests.name(), 0.0));
                }
                None => {}
            }
        }
        if let Some(ok) = ok_lint {
            readings.push(SignalReading::new(
                Signal::Lint.name(),
                if ok { 1.0 } else { 0.0 },
            ));
        }
        if let Some(m) = &perf {
            readings.push(SignalReading::new(
                Signal::Perf.name(),
                scoring::normalize_perf(session.best_perf, m.value),
            ));
        }

        let score = scoring::calculate_weighted_score(&readings, &session.cfg.weights)?;
        let ema_score = scoring::update_ema(session.ema_score, score, session.cfg.ema_alpha);
        let (best_score, no_improve_streak) =
            scoring::update_improvement(session.best_score, session.no_improve_streak, ema_score);
        let step = session.step + 1;

        let ctx = HaltContext {
            step,
            score,
            tests: tests.as_ref(),
            no_improve_streak,
        };
        let (should_halt, reasons) = scoring::should_halt(&ctx, &session.cfg.halt);

        if feedback.is_empty() {
            feedback.push("⚠️ No checks configured; nothing to score".to_string());
        }
        feedback.push(format!(
            "📊 Score {score:.3} (ema {ema_score:.3}), step {step}/{}",
            session.cfg.halt.max_steps
        ));

        tracing::debug!(
            session = %session.id,
            step,
            score,
            ema = ema_score,
            halt = should_halt,
            "evaluation complete"
        );

        // The best runtime seeds/updates only after this step's ratio was
        // computed against the previous best.
        let best_perf = match (session.best_perf, &perf) {
            (None, Some(m)) => Some(m.value),
            (Some(best), Some(m)) => Some(best.min(m.value)),
            (best, None) => best,
        };

        let result = EvalResult {
            step,
            score,
            ema_score,
            best_score,
            ok_data_quality,
            tests,
            ok_lint,
            perf,
            should_halt,
            reasons,
            feedback,
        };

        // Commit: every mutation for this step lands together.
        session.step = step;
        session.ema_score = Some(ema_score);
        session.best_score = best_score;
        session.best_perf = best_perf;
        session.no_improve_streak = no_improve_streak;
        session.history.push(result.clone());

        Ok(result)
    }

    /// Read-only validation before iteration starts: the working directory
    /// exists, configured commands resolve, and the project builds and
    /// tests at baseline. Mutates nothing.
    pub async fn preflight(&self, session: &SessionState) -> PreflightReport {
        let repo_exists = session.cfg.repo_path.is_dir();
        let mut report = PreflightReport {
            repo_exists,
            commands_available: BTreeMap::new(),
            initial_build: None,
            initial_tests: None,
        };
        if !repo_exists {
            return report;
        }

        for signal in Signal::EVALUATION_ORDER {
            if let Some(cmd) = session.cfg.command(signal) {
                let program = cmd.split_whitespace().next().unwrap_or(cmd);
                let check = self
                    .subprocess
                    .shell(
                        &format!("command -v {program}"),
                        &session.cfg.repo_path,
                        AVAILABILITY_TIMEOUT,
                    )
                    .await;
                report
                    .commands_available
                    .insert(signal.name().to_string(), check.ok);
            }
        }

        if let Some(cmd) = session.cfg.command(Signal::DataQuality) {
            let result = self
                .subprocess
                .shell(cmd, &session.cfg.repo_path, session.cfg.timeout)
                .await;
            let output = if result.ok {
                &result.stdout
            } else {
                &result.stderr
            };
            report.initial_build = Some(CheckOutcome {
                success: result.ok,
                output: output.chars().take(500).collect(),
            });
        }

        if let Some(cmd) = session.cfg.command(Signal::Tests) {
            let result = self
                .subprocess
                .shell(cmd, &session.cfg.repo_path, session.cfg.timeout)
                .await;
            let tests =
                parser::parse_test_output(&result.combined_output(), session.cfg.test_framework);
            let success = result.ok && tests.as_ref().is_some_and(|t| t.failed == 0);
            report.initial_tests = Some(InitialTests { success, tests });
        }

        report
    }
}

/// Preflight results, keyed by signal name where per-command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub repo_exists: bool,
    pub commands_available: BTreeMap<String, bool>,
    pub initial_build: Option<CheckOutcome>,
    pub initial_tests: Option<InitialTests>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub success: bool,
    /// Truncated command output for the report.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialTests {
    pub success: bool,
    pub tests: Option<TestResults>,
}

fn perf_feedback(perf: &PerfResults, best: Option<f64>) -> String {
    match best {
        Some(b) if perf.value < b => {
            format!("⚡ Performance: {:.3}s (↓ {:.3}s)", perf.value, b - perf.value)
        }
        Some(b) if perf.value > b => {
            format!("⚠️ Performance: {:.3}s (↑ {:.3}s)", perf.value, perf.value - b)
        }
        Some(_) => format!("⚡ Performance: {:.3}s (no change)", perf.value),
        None => format!("⚡ Performance: {:.3}s", perf.value),
    }
}

/// Short failure description: stderr first, stdout as fallback.
fn failure_snippet(result: &CommandResult) -> String {
    let text = if result.stderr.trim().is_empty() {
        result.stdout.trim()
    } else {
        result.stderr.trim()
    };
    if text.is_empty() {
        return format!("exit code {}", result.exit_code);
    }
    text.chars().take(200).collect()
}

/// Last few lines of a failing command, where linters put their summary.
fn failure_tail(result: &CommandResult) -> String {
    let text = if result.stderr.trim().is_empty() {
        result.stdout.trim()
    } else {
        result.stderr.trim()
    };
    if text.is_empty() {
        return format!("exit code {}", result.exit_code);
    }
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("; ")
}
