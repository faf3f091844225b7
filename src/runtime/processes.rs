use super::sandbox::release_script;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

/// Upper bound on reading leftover output from a stopped process. A
/// grandchild still holding the pipe must not stall the session.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A background run started by `execute_code`.
pub struct RunningProcess {
    id: String,
    child: Child,
    script: Option<TempPath>,
    started_at: Instant,
}

impl RunningProcess {
    pub(crate) fn new(child: Child, script: TempPath) -> Self {
        let id = child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            id,
            child,
            script: Some(script),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runtime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process ID {0} not found in running processes.")]
    NotFound(String),
    /// Termination failed. Whatever output could still be read is kept.
    #[error("Error stopping process {id}: {source}{}", .output.render_output())]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
        output: StopReport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub id: String,
    pub running: bool,
    pub runtime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub id: String,
    pub stdout: String,
    pub stderr: String,
}

impl StopReport {
    pub fn render(&self) -> String {
        format!("Process {} stopped.{}", self.id, self.render_output())
    }

    fn render_output(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&format!("\nFinal STDOUT:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            out.push_str(&format!("\nFinal STDERR:\n{}", self.stderr));
        }
        out
    }
}

/// Background runs owned by one session.
pub struct ProcessTable {
    entries: BTreeMap<String, RunningProcess>,
    /// Every id handed out so far, including stopped processes.
    issued: BTreeSet<String>,
    grace: Duration,
}

impl ProcessTable {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            issued: BTreeSet::new(),
            grace,
        }
    }

    /// Track a process and return its id. A recycled pid gets a numeric
    /// suffix, so an id is never handed out twice by the same table.
    pub fn insert(&mut self, mut process: RunningProcess) -> String {
        process.id = self.unused_id(&process.id);
        let id = process.id.clone();
        self.issued.insert(id.clone());
        tracing::info!(id = %id, "background process started");
        self.entries.insert(id.clone(), process);
        id
    }

    fn unused_id(&self, base: &str) -> String {
        if !self.issued.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.issued.contains(candidate))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&mut self) -> Vec<ProcessStatus> {
        self.entries
            .values_mut()
            .map(|process| ProcessStatus {
                id: process.id.clone(),
                running: process.is_running(),
                runtime: process.runtime(),
            })
            .collect()
    }

    pub fn render_list(&mut self) -> String {
        let statuses = self.list();
        if statuses.is_empty() {
            return "No running processes.".to_string();
        }
        let mut out = String::from("Running processes:\n");
        for status in statuses {
            out.push_str(&format!(
                "  ID: {}, Status: {}, Runtime: {:.1}s\n",
                status.id,
                if status.running { "Running" } else { "Finished" },
                status.runtime.as_secs_f64()
            ));
        }
        out
    }

    /// Terminate a process: polite signal, bounded wait, then a hard kill.
    /// Leftover output is drained and the scratch script removed before the
    /// entry is dropped, whether or not termination succeeded.
    pub async fn stop(&mut self, id: &str) -> Result<StopReport, ProcessError> {
        let grace = self.grace;
        let process = self
            .entries
            .get_mut(id)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        let terminated = if process.is_running() {
            terminate(id, &mut process.child, grace).await
        } else {
            Ok(())
        };
        self.finish_stop(id, terminated).await
    }

    async fn finish_stop(
        &mut self,
        id: &str,
        terminated: std::io::Result<()>,
    ) -> Result<StopReport, ProcessError> {
        let process = self
            .entries
            .get_mut(id)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        let stdout = drain(process.child.stdout.take()).await;
        let stderr = drain(process.child.stderr.take()).await;
        if let Some(script) = process.script.take() {
            release_script(script);
        }
        self.entries.remove(id);

        let report = StopReport {
            id: id.to_string(),
            stdout,
            stderr,
        };
        match terminated {
            Ok(()) => {
                tracing::info!(id, "background process stopped");
                Ok(report)
            }
            Err(source) => {
                tracing::warn!(id, error = %source, "background process may still be running");
                Err(ProcessError::Io {
                    id: id.to_string(),
                    source,
                    output: report,
                })
            }
        }
    }

    /// Stop everything, e.g. on shutdown. Failures are logged and skipped.
    pub async fn stop_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                tracing::warn!(id = %id, error = %e, "failed to stop background process");
            }
        }
    }
}

async fn terminate(id: &str, child: &mut Child, grace: Duration) -> std::io::Result<()> {
    request_terminate(child).await;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => {
            tracing::warn!(id, "process ignored SIGTERM; killing");
            child.kill().await
        }
    }
}

#[cfg(unix)]
async fn request_terminate(child: &mut Child) {
    let Some(pid) = child.id() else { return };
    let sent = tokio::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .await;
    if !matches!(sent, Ok(status) if status.success()) {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn request_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, pipe.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}
