//! External command execution
//!
//! Every tool invocation (git, zip) goes through [`CommandRunner`], which
//! passes arguments as a vector, never through a shell, and bounds each call
//! with a timeout.

use crate::error::{ReposerveError, ReposerveResult};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Max number of output lines to include in backend error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of command output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub fn error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail = if total > ERROR_TAIL_LINES {
        &lines[total - ERROR_TAIL_LINES..]
    } else {
        &lines[..]
    };
    tail.join("\n")
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for logs and errors
    pub command: String,
    /// Whether the process exited with status 0
    pub success: bool,
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Raw stdout bytes
    pub stdout: Vec<u8>,
    /// Raw stderr bytes
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Stdout decoded lossily
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Both streams, tail-trimmed
    pub fn diagnostics(&self) -> String {
        error_output(&self.stdout_str(), &self.stderr_str())
    }

    /// Convert a non-zero exit into a backend error
    pub fn into_success(self) -> ReposerveResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ReposerveError::backend(&self.command, self.diagnostics()))
        }
    }
}

/// Runs external programs with a bounded wall-clock time
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    /// Create a runner whose invocations time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program args...` in `cwd` and capture its output
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
    ) -> ReposerveResult<CommandOutput> {
        self.run_with_env(program, args, cwd, &[]).await
    }

    /// Run with additional environment variables
    pub async fn run_with_env<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
        envs: &[(&str, &str)],
    ) -> ReposerveResult<CommandOutput> {
        let command = render(program, args);
        debug!("Executing in {}: {}", cwd.display(), command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ReposerveError::command_failed(&command, e))?,
            Err(_) => {
                return Err(ReposerveError::CommandTimeout {
                    command,
                    secs: self.timeout.as_secs(),
                })
            }
        };

        Ok(CommandOutput {
            command,
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Whether `program --version` runs successfully
    pub async fn is_available(&self, program: &str) -> bool {
        let cwd = std::env::temp_dir();
        self.run(program, &["--version"], &cwd)
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }
}

fn render<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}
