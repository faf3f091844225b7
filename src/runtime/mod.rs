//! Local code execution: foreground sandboxed runs and the per-session table
//! of background processes.

pub mod processes;
pub mod sandbox;

pub use processes::{ProcessError, ProcessStatus, ProcessTable, RunningProcess, StopReport};
pub use sandbox::{ExecutionReport, Sandbox};

use crate::config::Config;
use std::path::Path;
use std::time::Duration;

/// Factory: build the sandbox described by `[execution]`.
pub fn create_sandbox(config: &Config, workspace_dir: &Path) -> Sandbox {
    Sandbox::new(
        config.execution.interpreter_path(workspace_dir),
        Duration::from_secs(config.execution.timeout_secs),
        workspace_dir,
    )
}
