//! Unified shell command abstraction.
//!
//! All external checks go through [`SubprocessManager`], which holds the
//! runner as an injectable trait object so the pipeline can be tested
//! without spawning processes.

pub mod mock;
pub mod runner;

pub use mock::MockCommandRunner;
pub use runner::{CommandResult, CommandRunner, ShellCommand, TokioCommandRunner};
pub use runner::SYNTHETIC_EXIT_CODE;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn CommandRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioCommandRunner))
    }

    pub fn mock() -> (Self, MockCommandRunner) {
        let mock = MockCommandRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn CommandRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Run one shell command with a working directory and timeout.
    pub async fn shell(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandResult {
        self.runner
            .execute(&ShellCommand::new(command, cwd, timeout))
            .await
    }
}
