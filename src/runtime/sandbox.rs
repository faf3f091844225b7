use super::processes::RunningProcess;
use crate::tools::ToolError;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;

/// Runs model-supplied code under a dedicated interpreter.
///
/// The code is written to a uniquely named scratch script which is removed
/// on every exit path: normal completion, spawn failure and timeout.
#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: PathBuf,
    timeout: Duration,
    working_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
}

/// Captured output of a foreground run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Text handed back to the model.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&format!("STDOUT:\n{}\n", self.stdout));
        }
        if !self.stderr.is_empty() {
            out.push_str(&format!("STDERR:\n{}\n", self.stderr));
        }
        match self.exit_code {
            Some(0) => {}
            Some(code) => out.push_str(&format!("Exit code: {code}\n")),
            None => out.push_str("Exit code: terminated by signal\n"),
        }
        if out.is_empty() {
            out.push_str("Code executed successfully with no output.");
        }
        out
    }
}

impl Sandbox {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            working_dir: working_dir.into(),
            scratch_dir: None,
        }
    }

    /// Put scratch scripts in `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn write_script(&self, code: &str) -> anyhow::Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("toolsmith-").suffix(".py");
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("failed to create scratch script")?;
        file.write_all(code.as_bytes())
            .and_then(|()| file.flush())
            .context("failed to write scratch script")?;
        Ok(file.into_temp_path())
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run `code` to completion, or until the wall-clock ceiling.
    ///
    /// A timeout is returned as [`ToolError::Timeout`] inside the
    /// `anyhow::Error` so callers can tell it apart from other failures.
    pub async fn run(&self, code: &str) -> anyhow::Result<ExecutionReport> {
        let script = self.write_script(code)?;
        let outcome = self.run_script(&script).await;
        release_script(script);
        outcome
    }

    async fn run_script(&self, script: &Path) -> anyhow::Result<ExecutionReport> {
        let child = self.command(script).spawn().with_context(|| {
            format!("failed to start {}", self.interpreter.display())
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                tracing::warn!(secs = self.timeout.as_secs(), "code execution timed out");
                Err(ToolError::Timeout {
                    secs: self.timeout.as_secs(),
                }
                .into())
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("failed to collect process output")),
            Ok(Ok(output)) => Ok(ExecutionReport {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
            }),
        }
    }

    /// Start `code` without waiting for it. Output stays in the pipes until
    /// the process is stopped.
    pub fn spawn(&self, code: &str) -> anyhow::Result<RunningProcess> {
        let script = self.write_script(code)?;
        match self.command(&script).spawn() {
            Ok(child) => Ok(RunningProcess::new(child, script)),
            Err(e) => {
                release_script(script);
                Err(anyhow::Error::new(e)
                    .context(format!("failed to start {}", self.interpreter.display())))
            }
        }
    }
}

pub(crate) fn release_script(script: TempPath) {
    let path = script.to_path_buf();
    if let Err(e) = script.close() {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch script");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell_sandbox(scratch: &TempDir, timeout: Duration) -> Sandbox {
        Sandbox::new("/bin/sh", timeout, scratch.path()).with_scratch_dir(scratch.path())
    }

    fn scratch_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn captures_streams_and_exit_code() {
        let scratch = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&scratch, Duration::from_secs(10));
        let report = sandbox
            .run("echo hi\necho oops 1>&2\nexit 3\n")
            .await
            .unwrap();
        assert_eq!(report.stdout, "hi\n");
        assert_eq!(report.stderr, "oops\n");
        assert_eq!(report.exit_code, Some(3));
        assert!(!report.succeeded());
        let text = report.render();
        assert!(text.contains("STDOUT:\nhi"));
        assert!(text.contains("STDERR:\noops"));
        assert!(text.contains("Exit code: 3"));
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn silent_success_has_placeholder_text() {
        let scratch = TempDir::new().unwrap();
        let report = shell_sandbox(&scratch, Duration::from_secs(10))
            .run("true\n")
            .await
            .unwrap();
        assert_eq!(report.render(), "Code executed successfully with no output.");
    }

    #[tokio::test]
    async fn timeout_is_reported_and_script_removed() {
        let scratch = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&scratch, Duration::from_secs(1));
        let started = std::time::Instant::now();
        let err = sandbox.run("sleep 5\n").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(
            err.downcast_ref::<ToolError>(),
            Some(&ToolError::Timeout { secs: 1 })
        );
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn missing_interpreter_cleans_up() {
        let scratch = TempDir::new().unwrap();
        let sandbox = Sandbox::new(
            scratch.path().join("no-such-python"),
            Duration::from_secs(1),
            scratch.path(),
        )
        .with_scratch_dir(scratch.path());
        assert!(sandbox.run("print(1)").await.is_err());
        assert!(sandbox.spawn("print(1)").is_err());
        assert!(scratch_is_empty(&scratch));
    }
}
