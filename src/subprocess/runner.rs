use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Synthetic exit code for timeouts, spawn failures, and signal deaths.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// One shell command to run against a working directory.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub command: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: HashMap<String, String>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout,
            env: HashMap::new(),
        }
    }
}

/// Outcome of a shell command. Expected failure modes (nonzero exit,
/// timeout, spawn failure) are all captured here, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Stdout and stderr joined, for parsers that scan both streams.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &ShellCommand) -> CommandResult;
}

/// Production runner backed by `tokio::process`.
///
/// Commands run under `sh -c` in their own process group so a timeout can
/// take the whole tree down. Both output pipes are drained concurrently
/// with the wait to avoid pipe-buffer deadlock on chatty commands.
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    fn configure(command: &ShellCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command.command)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// SIGTERM the process group, give it a moment, then SIGKILL.
    #[cfg(unix)]
    async fn kill_process_group(pid: Option<u32>) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            let pgid = Pid::from_raw(-(pid as i32));
            let _ = signal::kill(pgid, Signal::SIGTERM);
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = signal::kill(pgid, Signal::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    async fn kill_process_group(_pid: Option<u32>) {}

    async fn drain<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>) -> String {
        let Some(mut reader) = reader else {
            return String::new();
        };
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn exit_code(status: std::process::ExitStatus) -> i32 {
        if let Some(code) = status.code() {
            return code;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return 128 + signal;
            }
        }
        SYNTHETIC_EXIT_CODE
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn execute(&self, command: &ShellCommand) -> CommandResult {
        if !command.cwd.is_dir() {
            return CommandResult::failure(
                1,
                format!("working directory does not exist: {}", command.cwd.display()),
            );
        }

        tracing::debug!(
            command = %command.command,
            cwd = %command.cwd.display(),
            timeout_secs = command.timeout.as_secs(),
            "executing shell command"
        );

        let mut child = match Self::configure(command).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %command.command, error = %e, "failed to spawn");
                return CommandResult::failure(
                    SYNTHETIC_EXIT_CODE,
                    format!("command execution failed: {e}"),
                );
            }
        };
        let pid = child.id();

        // Readers run as tasks so the pipes drain while we wait; a full
        // pipe would otherwise block the child before it can exit.
        let stdout_task = tokio::spawn(Self::drain(child.stdout.take()));
        let stderr_task = tokio::spawn(Self::drain(child.stderr.take()));

        let status = match tokio::time::timeout(command.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return CommandResult::failure(
                    SYNTHETIC_EXIT_CODE,
                    format!("command execution failed: {e}"),
                );
            }
            Err(_) => {
                tracing::warn!(
                    command = %command.command,
                    timeout_secs = command.timeout.as_secs(),
                    "command timed out, killing process group"
                );
                Self::kill_process_group(pid).await;
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return CommandResult::failure(
                    SYNTHETIC_EXIT_CODE,
                    format!("timed out after {}s", command.timeout.as_secs()),
                );
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = Self::exit_code(status);

        tracing::debug!(
            command = %command.command,
            exit_code,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "shell command finished"
        );

        CommandResult {
            ok: status.success(),
            stdout,
            stderr,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn command(cmd: &str, cwd: &std::path::Path) -> ShellCommand {
        ShellCommand::new(cmd, cwd, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = TokioCommandRunner
            .execute(&command("echo hello", dir.path()))
            .await;

        assert!(result.ok);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TokioCommandRunner
            .execute(&command("echo oops >&2; exit 3", dir.path()))
            .await;

        assert!(!result.ok);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn timeout_kills_and_annotates() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = command("sleep 10", dir.path());
        cmd.timeout = Duration::from_millis(200);

        let start = std::time::Instant::now();
        let result = TokioCommandRunner.execute(&cmd).await;

        assert!(!result.ok);
        assert_eq!(result.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(result.stderr.contains("timed out after"), "{}", result.stderr);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_working_directory_is_captured() {
        let result = TokioCommandRunner
            .execute(&command("true", std::path::Path::new("/no/such/dir/anywhere")))
            .await;

        assert!(!result.ok);
        assert!(result.stderr.contains("working directory does not exist"));
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        // Well past the 64KiB pipe buffer on both streams.
        let result = TokioCommandRunner
            .execute(&command(
                "yes x | head -c 200000; yes e | head -c 200000 >&2",
                dir.path(),
            ))
            .await;

        assert!(result.ok);
        assert_eq!(result.stdout.len(), 200_000);
        assert_eq!(result.stderr.len(), 200_000);
    }

    #[test]
    fn combined_output_joins_streams() {
        let result = CommandResult {
            ok: true,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: 0,
        };
        assert_eq!(result.combined_output(), "out\nerr");
    }

    #[test]
    fn runs_under_tokio_test_block_on() {
        let dir = tempfile::tempdir().unwrap();
        let result = tokio_test::block_on(TokioCommandRunner.execute(&command("true", dir.path())));
        assert!(result.ok);
    }
}
