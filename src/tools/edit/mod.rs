//! Targeted file edits: a secondary model proposes search/replace blocks,
//! which are applied with whitespace tolerance and retried when they miss.

pub mod apply;
pub mod blocks;
pub mod flow;

pub use apply::{apply_blocks, ApplyReport};
pub use blocks::{parse_blocks, EditBlock};
pub use flow::{
    diff_counts, EditFlow, EditOutcome, EditProposer, EditRequest, EditStatus, ModelEditProposer,
};

use super::context::ToolContext;
use super::registry::{Dependency, LoadError, ToolEnv};
use super::schema::{object_schema, require_str};
use super::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct EditAndApplyTool {
    proposer: Arc<dyn EditProposer>,
    flow: EditFlow,
}

impl EditAndApplyTool {
    pub fn new(proposer: Arc<dyn EditProposer>, flow: EditFlow) -> Self {
        Self { proposer, flow }
    }

    /// Factory: requires a chat model for the editor role.
    pub fn load(env: &ToolEnv) -> Result<Box<dyn Tool>, LoadError> {
        let provider = env
            .provider
            .clone()
            .ok_or(LoadError::MissingDependency(Dependency::Model))?;
        let config = &env.config;
        let model = config
            .agent
            .editor_model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        let proposer = ModelEditProposer::new(provider, model, config.default_temperature);
        Ok(Box::new(Self::new(
            Arc::new(proposer),
            EditFlow::new(config.agent.max_edit_attempts),
        )))
    }
}

#[async_trait]
impl Tool for EditAndApplyTool {
    fn name(&self) -> &str {
        "edit_and_apply"
    }

    fn description(&self) -> &str {
        "Apply AI-powered improvements to a file based on specific instructions and project context. \
         Changes are proposed as search/replace blocks, applied, and summarized."
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            &[
                ("path", "string", "The path of the file to edit"),
                (
                    "instructions",
                    "string",
                    "Detailed instructions for the changes to make",
                ),
                (
                    "project_context",
                    "string",
                    "Overall context of the project and the goal of the change",
                ),
            ],
            &["path", "instructions", "project_context"],
        )
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let path = require_str(&args, "path")?;
        let instructions = require_str(&args, "instructions")?;
        let project_context = require_str(&args, "project_context")?;

        let outcome = self
            .flow
            .run(
                self.proposer.as_ref(),
                ctx,
                path,
                instructions,
                project_context,
            )
            .await?;

        Ok(match outcome.status {
            EditStatus::Failed => ToolResult::fail(outcome.render()),
            _ => ToolResult::ok(outcome.render()),
        })
    }
}
