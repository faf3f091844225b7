//! Code execution tools: run code in the sandbox, stop and list background
//! runs.

use super::context::ToolContext;
use super::registry::{Dependency, LoadError, ToolEnv};
use super::schema::{object_schema, require_str};
use super::traits::{Tool, ToolResult};
use crate::runtime::Sandbox;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ExecuteCodeTool {
    sandbox: Sandbox,
}

impl ExecuteCodeTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Factory: requires the configured interpreter to exist.
    pub fn load(env: &ToolEnv) -> Result<Box<dyn Tool>, LoadError> {
        let workspace = env.config.workspace_dir();
        let sandbox = crate::runtime::create_sandbox(&env.config, &workspace);
        if !sandbox.interpreter().exists() {
            return Err(LoadError::MissingDependency(Dependency::Interpreter(
                sandbox.interpreter().to_path_buf(),
            )));
        }
        Ok(Box::new(Self::new(sandbox)))
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute Python code in the code_execution_env virtual environment and return its output. \
         Set background=true for long-running code; a process ID is returned for stop_process."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "The Python code to execute"},
                "background": {
                    "type": "boolean",
                    "description": "Start the code without waiting for it to finish"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let code = require_str(&args, "code")?;
        let background = args
            .get("background")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if background {
            let process = match self.sandbox.spawn(code) {
                Ok(process) => process,
                Err(e) => {
                    return Ok(ToolResult::fail(format!(
                        "Error starting background process: {e:#}"
                    )))
                }
            };
            let id = ctx.processes.insert(process);
            return Ok(ToolResult::ok(format!(
                "Background process started with ID: {id}"
            )));
        }

        let report = self.sandbox.run(code).await?;
        Ok(ToolResult::ok(report.render()))
    }
}

pub struct StopProcessTool;

#[async_trait]
impl Tool for StopProcessTool {
    fn name(&self) -> &str {
        "stop_process"
    }

    fn description(&self) -> &str {
        "Stop a running process by its ID"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[("process_id", "string", "The ID of the process to stop")],
            &["process_id"],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        // Models sometimes send the pid as a number.
        let id = match args.get("process_id") {
            Some(Value::Number(n)) => n.to_string(),
            _ => require_str(&args, "process_id")?.trim().to_string(),
        };
        match ctx.processes.stop(&id).await {
            Ok(report) => Ok(ToolResult::ok(report.render())),
            Err(e) => Ok(ToolResult::fail(e.to_string())),
        }
    }
}

pub struct ListProcessesTool;

#[async_trait]
impl Tool for ListProcessesTool {
    fn name(&self) -> &str {
        "list_running_processes"
    }

    fn description(&self) -> &str {
        "List all currently running processes started by execute_code"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::ok(ctx.processes.render_list()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(dir.path(), Duration::from_secs(1))
    }

    #[test]
    fn load_reports_missing_interpreter() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.execution.interpreter = Some(tmp.path().join("absent/bin/python"));
        let env = ToolEnv::new(Arc::new(config), None);
        match ExecuteCodeTool::load(&env) {
            Err(LoadError::MissingDependency(Dependency::Interpreter(path))) => {
                assert!(path.ends_with("absent/bin/python"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("interpreter should be missing"),
        }
    }

    #[tokio::test]
    async fn stop_unknown_process_fails_softly() {
        let tmp = TempDir::new().unwrap();
        let result = StopProcessTool
            .execute(json!({"process_id": "999999"}), &mut ctx(&tmp))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("999999"));
    }

    #[tokio::test]
    async fn list_with_no_processes() {
        let tmp = TempDir::new().unwrap();
        let result = ListProcessesTool
            .execute(json!({}), &mut ctx(&tmp))
            .await
            .unwrap();
        assert_eq!(result.output, "No running processes.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn foreground_and_background_runs() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::new("/bin/sh", Duration::from_secs(5), tmp.path());
        let tool = ExecuteCodeTool::new(sandbox);
        let mut ctx = ctx(&tmp);

        let fg = tool
            .execute(json!({"code": "echo hello"}), &mut ctx)
            .await
            .unwrap();
        assert!(fg.success);
        assert!(fg.output.contains("STDOUT:\nhello"));

        let bg = tool
            .execute(json!({"code": "exec sleep 30", "background": true}), &mut ctx)
            .await
            .unwrap();
        let id = bg
            .output
            .strip_prefix("Background process started with ID: ")
            .unwrap()
            .to_string();
        assert!(ctx.processes.contains(&id));

        let stopped = StopProcessTool
            .execute(json!({"process_id": id.clone()}), &mut ctx)
            .await
            .unwrap();
        assert!(stopped.success);
        assert!(stopped.output.starts_with(&format!("Process {id} stopped.")));
        assert!(ctx.processes.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn foreground_timeout_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::new("/bin/sh", Duration::from_secs(1), tmp.path());
        let err = ExecuteCodeTool::new(sandbox)
            .execute(json!({"code": "sleep 5"}), &mut ctx(&tmp))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<crate::tools::ToolError>().is_some());
    }
}
