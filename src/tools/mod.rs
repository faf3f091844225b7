//! Tool subsystem for model-callable capabilities.
//!
//! Each tool implements the [`Tool`] trait defined in [`traits`]: a name, a
//! description, a JSON parameter schema and an async `execute` that works
//! against the session's [`ToolContext`].
//!
//! Tools are not constructed directly. [`default_registry`] registers one
//! factory per tool, and [`ToolRegistry::discover`] instantiates them,
//! skipping tools whose dependencies (interpreter, API key, editor model) are
//! unavailable. Calls extracted by [`parser`] run through [`ToolExecutor`],
//! which turns every failure into an error [`ToolOutcome`].
//!
//! # Extension
//!
//! To add a tool, implement [`Tool`] in a new submodule and register a
//! factory for it in [`default_registry`].

pub mod code_exec;
pub mod context;
pub mod edit;
pub mod error;
pub mod executor;
pub mod file_ops;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod web_search;

pub use code_exec::{ExecuteCodeTool, ListProcessesTool, StopProcessTool};
pub use context::ToolContext;
pub use edit::EditAndApplyTool;
pub use error::ToolError;
pub use executor::{scrub_credentials, ToolExecutor, ToolOutcome};
pub use file_ops::{
    CreateFileTool, CreateFolderTool, ListFilesTool, ReadFileTool, ReadMultipleFilesTool,
};
pub use parser::{CallSource, ParsedCall, ToolInvocation};
pub use registry::{
    Dependency, DependencyInstaller, LoadError, LoadFailure, ToolEnv, ToolRegistry, VenvInstaller,
};
pub use traits::{Tool, ToolResult, ToolSpec};
pub use web_search::TavilySearchTool;

/// Registry with a factory for every built-in tool, in catalogue order.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register("create_folder", |_| Ok(Box::new(CreateFolderTool)));
    registry.register("create_file", |_| Ok(Box::new(CreateFileTool)));
    registry.register("read_file", |_| Ok(Box::new(ReadFileTool)));
    registry.register("read_multiple_files", |_| Ok(Box::new(ReadMultipleFilesTool)));
    registry.register("list_files", |_| Ok(Box::new(ListFilesTool)));
    registry.register("edit_and_apply", EditAndApplyTool::load);
    registry.register("execute_code", ExecuteCodeTool::load);
    registry.register("stop_process", |_| Ok(Box::new(StopProcessTool)));
    registry.register("list_running_processes", |_| Ok(Box::new(ListProcessesTool)));
    registry.register("tavily_search", TavilySearchTool::load);
    registry
}
