use super::context::ToolContext;
use super::error::ToolError;
use super::parser::{ParsedCall, ToolInvocation};
use super::registry::ToolRegistry;
use super::schema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Normalized result of one tool call, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(err: ToolError) -> Self {
        Self::failure(format!("Error: {err}"))
    }
}

static SENSITIVE_KV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(token|api[_-]?key|password|secret|bearer|credential)["']?\s*[:=]\s*(?:"([^"]{8,})"|'([^']{8,})'|([a-zA-Z0-9_\-\.]{8,}))"#)
        .expect("credential pattern is valid")
});

/// Redact `key=value` style credentials in tool output, keeping a short
/// prefix of the value for context.
pub fn scrub_credentials(input: &str) -> String {
    SENSITIVE_KV_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let full_match = &caps[0];
            let key = &caps[1];
            let val = caps
                .get(2)
                .or(caps.get(3))
                .or(caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            let prefix = val.get(..4).filter(|_| val.len() > 4).unwrap_or("");
            let sep = if full_match.contains('=') { "=" } else { ": " };
            format!("{key}{sep}{prefix}*[REDACTED]")
        })
        .to_string()
}

/// Dispatches decoded calls against the registry.
///
/// Order of checks: unknown tool, missing required parameter, then the
/// handler itself. Every failure becomes an error outcome; nothing is
/// propagated to the caller and nothing is retried here.
pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, call: &ToolInvocation, ctx: &mut ToolContext) -> ToolOutcome {
        match self.try_execute(call, ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                ToolOutcome::from(err)
            }
        }
    }

    /// Execute a parser result, turning parse failures into error outcomes.
    pub async fn execute_parsed(&self, call: &ParsedCall, ctx: &mut ToolContext) -> ToolOutcome {
        match call {
            Ok(invocation) => self.execute(invocation, ctx).await,
            Err(failure) => {
                tracing::warn!(tool = %failure.name, error = %failure.error, "tool arguments rejected");
                ToolOutcome::from(failure.error.clone())
            }
        }
    }

    async fn try_execute(
        &self,
        call: &ToolInvocation,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.name.clone(),
            })?;

        let schema = tool.parameters_schema();
        if let Some(parameter) = schema::first_missing(&schema, &call.arguments) {
            return Err(ToolError::MissingParameter {
                tool: call.name.clone(),
                parameter: parameter.to_string(),
            });
        }

        tracing::debug!(tool = %call.name, "executing tool");
        let args = serde_json::Value::Object(call.arguments.clone());
        let result = tool.execute(args, ctx).await.map_err(|err| {
            err.downcast::<ToolError>()
                .unwrap_or_else(|other| ToolError::Handler {
                    tool: call.name.clone(),
                    message: format!("{other:#}"),
                })
        })?;

        if result.success {
            Ok(ToolOutcome::success(scrub_credentials(&result.output)))
        } else {
            let reason = result
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or(result.output);
            Ok(ToolOutcome::failure(format!(
                "Error: {}",
                scrub_credentials(&reason)
            )))
        }
    }
}
