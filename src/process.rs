use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A toolchain invocation: formatter, linter, compiler, test runner.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_prefix: String,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str], working_dir: &std::path::Path) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: working_dir.to_path_buf(),
            timeout: None,
            log_prefix: program.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_log_prefix(mut self, prefix: &str) -> Self {
        self.log_prefix = prefix.to_string();
        self
    }
}

/// Captured output of a completed toolchain run.
///
/// A tool that could not be started (or timed out) never produces one of
/// these: that is an execution error. A non-zero exit is a normal, failed
/// check and is represented here.
#[derive(Debug)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    /// stdout and stderr joined with a blank-line separator, empty streams
    /// omitted.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (false, false) => format!(
                "{}\n\n{}",
                self.stdout.trim_end(),
                self.stderr.trim_end()
            ),
        }
    }
}

/// Run a toolchain command, streaming its output line-by-line to the log.
///
/// The child is placed in its own process group on Unix; SIGINT and SIGTERM
/// received by the parent are forwarded to the group. Exceeding the timeout
/// kills the group (SIGTERM, then SIGKILL) and returns an execution error.
pub async fn run_tool(config: ToolCommand) -> Result<ToolOutput> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        Error::Execution(format!("failed to spawn '{}': {e}", config.program))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Execution("child has no pid".into()))?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix.clone();

    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!("[{prefix_out}] {line}");
            lines.push(line);
        }
        lines
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!("[{prefix_err}] {line}");
            lines.push(line);
        }
        lines
    });

    #[cfg(unix)]
    let signal_task = {
        let pgid = pid as i32;
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGINT); }
                    }
                    _ = sigterm.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGTERM); }
                    }
                }
            }
        })
    };

    let status = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Execution(format!("wait error: {e}")))?,
            Err(_) => {
                #[cfg(unix)]
                signal_task.abort();
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGTERM);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
                stdout_task.abort();
                stderr_task.abort();
                warn!(program = %config.program, "tool timed out after {dur:?}");
                return Err(Error::Execution(format!(
                    "'{}' timed out after {dur:?}",
                    config.program
                )));
            }
        }
    } else {
        child
            .wait()
            .await
            .map_err(|e| Error::Execution(format!("wait error: {e}")))?
    };

    #[cfg(unix)]
    signal_task.abort();

    let stdout_lines = stdout_task
        .await
        .map_err(|e| Error::Execution(format!("stdout reader failed: {e}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| Error::Execution(format!("stderr reader failed: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ToolOutput {
        exit_code,
        signal,
        stdout: stdout_lines.join("\n"),
        stderr: stderr_lines.join("\n"),
    })
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn out(stdout: &str, stderr: &str) -> ToolOutput {
        ToolOutput {
            exit_code: 0,
            signal: None,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_combined_both_streams() {
        let o = out("building...\ndone", "warning: unused");
        assert_eq!(o.combined(), "building...\ndone\n\nwarning: unused");
    }

    #[test]
    fn test_combined_stdout_only() {
        assert_eq!(out("hello", "").combined(), "hello");
    }

    #[test]
    fn test_combined_stderr_only() {
        assert_eq!(out("", "oops").combined(), "oops");
    }

    #[test]
    fn test_combined_empty() {
        assert_eq!(out("", "  \n").combined(), "");
    }

    #[test]
    fn test_success_requires_zero_exit_and_no_signal() {
        let mut o = out("", "");
        assert!(o.success());
        o.exit_code = 2;
        assert!(!o.success());
        o.exit_code = 0;
        o.signal = Some(15);
        assert!(!o.success());
    }

    #[test]
    fn test_tool_command_builder() {
        let cmd = ToolCommand::new("go", &["build", "./..."], Path::new("/repo"))
            .with_timeout(Duration::from_secs(5))
            .with_log_prefix("verify:go");
        assert_eq!(cmd.program, "go");
        assert_eq!(cmd.args, vec!["build", "./..."]);
        assert_eq!(cmd.working_dir, PathBuf::from("/repo"));
        assert_eq!(cmd.timeout, Some(Duration::from_secs(5)));
        assert_eq!(cmd.log_prefix, "verify:go");
    }

    #[tokio::test]
    async fn test_run_tool_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::new("sh", &["-c", "echo out; echo err >&2"], tmp.path());
        let output = run_tool(cmd).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
    }

    #[tokio::test]
    async fn test_run_tool_nonzero_exit_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::new("sh", &["-c", "echo broken >&2; exit 3"], tmp.path());
        let output = run_tool(cmd).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr, "broken");
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary_is_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::new("definitely-not-a-real-binary", &[], tmp.path());
        let err = run_tool(cmd).await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }

    #[tokio::test]
    async fn test_run_tool_timeout_is_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ToolCommand::new("sleep", &["5"], tmp.path())
            .with_timeout(Duration::from_millis(100));
        let err = run_tool(cmd).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
