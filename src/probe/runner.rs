//! Subprocess execution for probe tools.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// The tool ran to completion.
    Exited {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The configured timeout elapsed; the child was killed.
    TimedOut,
    /// The tool could not be started.
    LaunchFailed(String),
}

impl ToolOutput {
    /// Whether the tool exited with status 0.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0), .. })
    }
}

/// Run `program` with `args`, capturing stdout and stderr in full.
///
/// Without a timeout the call waits as long as the tool runs. With one, the
/// child is killed when the timeout elapses.
pub async fn run_tool(program: &str, args: &[String], timeout: Option<Duration>) -> ToolOutput {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!(program, ?args, "Launching probe tool");

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, command.output()).await {
            Ok(result) => result,
            Err(_) => return ToolOutput::TimedOut,
        },
        None => command.output().await,
    };

    match output {
        Ok(output) => ToolOutput::Exited {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => ToolOutput::LaunchFailed(format!("{program}: {e}")),
    }
}
