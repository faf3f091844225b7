use thiserror::Error;

/// Failures on the tool-invocation path. Every variant is converted into an
/// error outcome that the model sees; none of them end a turn.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Failed to parse tool arguments for {tool}: {reason}")]
    Parse { tool: String, reason: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Missing required parameter '{parameter}' for tool {tool}")]
    MissingParameter { tool: String, parameter: String },

    #[error("Error executing tool {tool}: {message}")]
    Handler { tool: String, message: String },

    #[error("Code execution timed out after {secs} seconds.")]
    Timeout { secs: u64 },
}
