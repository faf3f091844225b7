pub mod schema;

pub use schema::{AgentConfig, Config, ExecutionConfig, SearchConfig, ToolsConfig};
