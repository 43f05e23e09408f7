use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::runner::{CommandResult, CommandRunner, ShellCommand, SYNTHETIC_EXIT_CODE};

/// Scripted runner for tests. Responses are matched by substring against
/// the command string, in registration order; unmatched commands come back
/// as failing results so the pipeline's degraded paths get exercised too.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    calls: Arc<Mutex<Vec<ShellCommand>>>,
}

struct MockResponse {
    needle: String,
    result: CommandResult,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for any command containing `needle`.
    pub fn stub(&self, needle: &str, result: CommandResult) {
        self.responses.lock().unwrap().push(MockResponse {
            needle: needle.to_string(),
            result,
        });
    }

    pub fn stub_ok(&self, needle: &str, stdout: &str) {
        self.stub(
            needle,
            CommandResult {
                ok: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            },
        );
    }

    pub fn stub_failure(&self, needle: &str, exit_code: i32, stderr: &str) {
        self.stub(needle, CommandResult::failure(exit_code, stderr));
    }

    /// Commands executed so far, in order.
    pub fn calls(&self) -> Vec<ShellCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command.contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn execute(&self, command: &ShellCommand) -> CommandResult {
        self.calls.lock().unwrap().push(command.clone());

        let responses = self.responses.lock().unwrap();
        for response in responses.iter() {
            if command.command.contains(&response.needle) {
                return response.result.clone();
            }
        }

        CommandResult::failure(
            SYNTHETIC_EXIT_CODE,
            format!("no mock response for command: {}", command.command),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn matches_by_substring_in_order() {
        let mock = MockCommandRunner::new();
        mock.stub_ok("pytest", "5 passed");
        mock.stub_failure("ruff", 1, "E501 line too long");

        let result = mock
            .execute(&ShellCommand::new(
                "pytest -q",
                "/tmp",
                Duration::from_secs(1),
            ))
            .await;
        assert!(result.ok);
        assert_eq!(result.stdout, "5 passed");

        let result = mock
            .execute(&ShellCommand::new(
                "ruff check .",
                "/tmp",
                Duration::from_secs(1),
            ))
            .await;
        assert!(!result.ok);
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(mock.call_count("pytest"), 1);
    }

    #[tokio::test]
    async fn unmatched_command_fails() {
        let mock = MockCommandRunner::new();
        let result = mock
            .execute(&ShellCommand::new("mystery", "/tmp", Duration::from_secs(1)))
            .await;
        assert!(!result.ok);
        assert!(result.stderr.contains("no mock response"));
    }
}
