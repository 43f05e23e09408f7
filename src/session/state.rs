//! Mutable trajectory state for one session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CandidateSnapshot, SessionId, MAX_CANDIDATE_SNAPSHOTS};
use crate::config::EvalConfig;
use crate::error::{Error, Result};
use crate::parser::{PerfResults, TestResults};
use crate::scoring::{update_improvement, HaltReason};

/// Verdict for one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    /// 1-based step this evaluation produced.
    pub step: u32,
    pub score: f64,
    pub ema_score: f64,
    /// Best EMA score seen so far, including this step.
    pub best_score: f64,
    pub ok_data_quality: Option<bool>,
    pub tests: Option<TestResults>,
    pub ok_lint: Option<bool>,
    pub perf: Option<PerfResults>,
    pub should_halt: bool,
    /// Halting conditions that fired, in policy order; empty means continue.
    pub reasons: Vec<HaltReason>,
    /// One human-readable line per evaluated signal, plus a summary line.
    pub feedback: Vec<String>,
}

/// Complete state of one improvement trajectory.
///
/// Mutated only by the evaluation pipeline and by explicit restore; every
/// mutation for a step commits together, so a concurrent reader holding
/// the session lock sees either the pre-step or post-step snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub cfg: EvalConfig,
    pub created_at: DateTime<Utc>,
    /// Completed evaluation steps, starts at 0.
    pub step: u32,
    /// Smoothed score trajectory; `None` until the first evaluation.
    pub ema_score: Option<f64>,
    pub best_score: f64,
    /// Best (lowest) raw performance measurement seen so far, in seconds.
    pub best_perf: Option<f64>,
    pub no_improve_streak: u32,
    /// Append-only, never reordered or trimmed except by restore.
    pub history: Vec<EvalResult>,
    pub snapshots: Vec<CandidateSnapshot>,
    /// Free-text scratchpad the optimizer carries across steps.
    pub notes: Option<String>,
}

impl SessionState {
    pub fn new(cfg: EvalConfig) -> Self {
        Self {
            id: SessionId::new(),
            cfg,
            created_at: Utc::now(),
            step: 0,
            ema_score: None,
            best_score: 0.0,
            best_perf: None,
            no_improve_streak: 0,
            history: Vec::new(),
            snapshots: Vec::new(),
            notes: None,
        }
    }

    pub fn latest(&self) -> Option<&EvalResult> {
        self.history.last()
    }

    /// Record a pre-apply snapshot, evicting the oldest past the cap.
    pub fn record_snapshot(&mut self, snapshot: CandidateSnapshot) {
        self.snapshots.push(snapshot);
        if self.snapshots.len() > MAX_CANDIDATE_SNAPSHOTS {
            let excess = self.snapshots.len() - MAX_CANDIDATE_SNAPSHOTS;
            self.snapshots.drain(..excess);
        }
    }

    pub fn append_notes(&mut self, text: &str) {
        match &mut self.notes {
            Some(notes) => {
                notes.push('\n');
                notes.push_str(text);
            }
            None => self.notes = Some(text.to_string()),
        }
    }

    /// Rewind the trajectory to `step` completed evaluations.
    ///
    /// Truncates history and resets `step`, `ema_score`, `best_score`,
    /// `no_improve_streak`, and `best_perf` to the values they held at
    /// that point, replaying the surviving history where the value is not
    /// recorded directly. Snapshots at or past the target are dropped.
    /// File contents are the undo collaborator's job, not ours.
    pub fn restore_to_step(&mut self, step: u32) -> Result<()> {
        if step as usize > self.history.len() {
            return Err(Error::InvalidOperation(format!(
                "cannot restore session {} to step {step}: only {} steps recorded",
                self.id,
                self.history.len()
            )));
        }

        self.history.truncate(step as usize);
        self.step = step;
        self.ema_score = self.history.last().map(|e| e.ema_score);

        let mut best_score = 0.0;
        let mut streak = 0;
        for entry in &self.history {
            (best_score, streak) = update_improvement(best_score, streak, entry.ema_score);
        }
        self.best_score = best_score;
        self.no_improve_streak = streak;

        self.best_perf = self
            .history
            .iter()
            .filter_map(|e| e.perf.as_ref().map(|p| p.value))
            .fold(None, |best: Option<f64>, v| {
                Some(best.map_or(v, |b| b.min(v)))
            });

        self.snapshots.retain(|s| s.step < step);
        Ok(())
    }
}
