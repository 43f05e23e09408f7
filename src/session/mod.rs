//! In-memory session state and the process-wide session store.
//!
//! A session is one continuous improvement trajectory over a single target
//! project. All state lives in memory, keyed by an opaque identifier, and
//! is lost on process exit by design.

pub mod state;
pub mod store;

pub use state::{EvalResult, SessionState};
pub use store::{SessionHandle, SessionStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Snapshots retained per session before the oldest is evicted.
pub const MAX_CANDIDATE_SNAPSHOTS: usize = 10;

/// Opaque unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete file content for a candidate submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: String,
}

/// Per-file diff for a candidate submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffChange {
    pub path: PathBuf,
    pub diff: String,
}

/// A proposed set of file changes, tagged by submission mode.
///
/// The evaluation pipeline never inspects this: by the time it runs, the
/// working directory already reflects the candidate. The variant travels
/// on snapshots so undo collaborators can report what was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Candidate {
    Files { files: Vec<FileContent> },
    Patch { patch: String },
    Diff { changes: Vec<DiffChange> },
}

/// Prior file state recorded by the external patcher before each apply,
/// consumed by undo/restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    /// Session step at capture time, before the candidate was applied.
    pub step: u32,
    pub candidate: Option<Candidate>,
    pub files_before: HashMap<PathBuf, String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_opaque() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session-"));
    }

    #[test]
    fn candidate_serializes_with_mode_tag() {
        let candidate = Candidate::Patch {
            patch: "--- a/x\n+++ b/x\n".to_string(),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["mode"], "patch");

        let back: Candidate = serde_json::from_value(json).unwrap();
        assert_eq!(back, candidate);
    }
}
