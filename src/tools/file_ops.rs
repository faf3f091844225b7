//! File-system tools: create folders and files, read files into the session
//! context, list directories.

use super::context::ToolContext;
use super::schema::{object_schema, require_str, str_arg};
use super::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Create a directory (and parents). Repeating it is harmless.
pub struct CreateFolderTool;

#[async_trait]
impl Tool for CreateFolderTool {
    fn name(&self) -> &str {
        "create_folder"
    }

    fn description(&self) -> &str {
        "Create a new folder at the specified path"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[(
                "path",
                "string",
                "The absolute or relative path where the folder should be created",
            )],
            &["path"],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let path = require_str(&args, "path")?;
        match tokio::fs::create_dir_all(ctx.resolve(path)).await {
            Ok(()) => Ok(ToolResult::ok(format!("Folder created: {path}"))),
            Err(e) => Ok(ToolResult::fail(format!("Error creating folder: {e}"))),
        }
    }
}

/// Write a file, creating missing parent directories, and keep its content in
/// the session context.
pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file at the specified path with the given content"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[
                (
                    "path",
                    "string",
                    "The absolute or relative path where the file should be created",
                ),
                ("content", "string", "The content of the file"),
            ],
            &["path", "content"],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let path = require_str(&args, "path")?;
        let content = str_arg(&args, "content").unwrap_or_default();
        let full = ctx.resolve(path);

        if let Some(parent) = full.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::fail(format!("Error creating file: {e}")));
            }
        }
        if let Err(e) = tokio::fs::write(&full, content).await {
            return Ok(ToolResult::fail(format!("Error creating file: {e}")));
        }

        ctx.remember_file(path, content);
        Ok(ToolResult::ok(format!(
            "File created and added to system prompt: {path}"
        )))
    }
}

/// Read one file into the session context.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the specified path"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[(
                "path",
                "string",
                "The absolute or relative path of the file to read",
            )],
            &["path"],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let path = require_str(&args, "path")?;
        match tokio::fs::read_to_string(ctx.resolve(path)).await {
            Ok(content) => {
                ctx.remember_file(path, content);
                Ok(ToolResult::ok(format!(
                    "File '{path}' has been read and stored in the system prompt."
                )))
            }
            Err(e) => Ok(ToolResult::fail(format!("Error reading file: {e}"))),
        }
    }
}

/// Read several files at once. Succeeds if at least one file was read.
pub struct ReadMultipleFilesTool;

#[async_trait]
impl Tool for ReadMultipleFilesTool {
    fn name(&self) -> &str {
        "read_multiple_files"
    }

    fn description(&self) -> &str {
        "Read the contents of multiple files at the specified paths"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "An array of absolute or relative paths of the files to read"
                }
            },
            "required": ["paths"]
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let paths: Vec<&str> = args
            .get("paths")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("parameter 'paths' must be an array of strings"))?
            .iter()
            .filter_map(Value::as_str)
            .collect();

        let mut lines = Vec::with_capacity(paths.len());
        let mut read = 0usize;
        for path in paths {
            match tokio::fs::read_to_string(ctx.resolve(path)).await {
                Ok(content) => {
                    ctx.remember_file(path, content);
                    read += 1;
                    lines.push(format!(
                        "File '{path}' has been read and stored in the system prompt."
                    ));
                }
                Err(e) => lines.push(format!("Error reading file '{path}': {e}")),
            }
        }

        let report = lines.join("\n");
        if read == 0 {
            Ok(ToolResult::fail(if report.is_empty() {
                "No paths given".to_string()
            } else {
                report
            }))
        } else {
            Ok(ToolResult::ok(report))
        }
    }
}

/// List a directory's entries, sorted, with `/` after subdirectories.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List all files and directories in the specified folder"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[(
                "path",
                "string",
                "The absolute or relative path of the folder to list",
            )],
            &[],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let path = str_arg(&args, "path").unwrap_or(".");
        let mut dir = match tokio::fs::read_dir(ctx.resolve(path)).await {
            Ok(dir) => dir,
            Err(e) => return Ok(ToolResult::fail(format!("Error listing files: {e}"))),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(ToolResult::ok(names.join("\n")))
    }
}
