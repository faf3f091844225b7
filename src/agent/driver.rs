//! One user turn: request, optional tool round, follow-up, history update.

use super::prompt::{AutomodeProgress, PromptContext, SystemPromptBuilder};
use super::session::Session;
use crate::providers::{ChatRequest, ChatResponse, Provider, ToolCall};
use crate::tools::parser::{CallSource, ParsedCall};
use crate::tools::{ToolExecutor, ToolOutcome, ToolRegistry};
use anyhow::Context;
use std::sync::Arc;

const EMPTY_REPLY: &str = "I'm sorry, I didn't generate a response. Please try again.";
const EMPTY_FOLLOW_UP: &str = "Tool execution completed.";

/// Hooks for surfacing turn progress to a user interface.
pub trait TurnObserver: Send + Sync {
    fn on_tool_call(&self, _name: &str, _input: &str, _outcome: &ToolOutcome) {}
    fn on_token_usage(&self, _used: u64, _budget: u64) {}
}

/// Observer that ignores everything.
pub struct SilentObserver;

impl TurnObserver for SilentObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub tool_calls: usize,
    /// The completion sentinel appeared in the answer.
    pub completed: bool,
}

/// Drives the model for a session. Owns the tool catalogue.
pub struct Driver {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    model: String,
    temperature: f64,
    completion_sentinel: String,
    prompt: SystemPromptBuilder,
    observer: Box<dyn TurnObserver>,
}

impl Driver {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        model: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            provider,
            registry,
            model: model.into(),
            temperature,
            completion_sentinel: "AUTOMODE_COMPLETE".into(),
            prompt: SystemPromptBuilder::default(),
            observer: Box::new(SilentObserver),
        }
    }

    pub fn with_completion_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.completion_sentinel = sentinel.into();
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TurnObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_prompt(mut self, prompt: SystemPromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn completion_sentinel(&self) -> &str {
        &self.completion_sentinel
    }

    fn native_tools(&self) -> bool {
        self.provider.supports_native_tools()
    }

    fn system_prompt(
        &self,
        session: &Session,
        automode: Option<AutomodeProgress>,
        offer_tools: bool,
    ) -> String {
        let tools = self.registry.specs();
        self.prompt.build(&PromptContext {
            files: &session.tools.files,
            tools: &tools,
            marker_mode: !self.native_tools(),
            offer_tools,
            automode,
            completion_sentinel: &self.completion_sentinel,
        })
    }

    async fn send(
        &self,
        session: &mut Session,
        automode: Option<AutomodeProgress>,
        offer_tools: bool,
    ) -> anyhow::Result<ChatResponse> {
        let native = self.native_tools();
        let system = self.system_prompt(session, automode, offer_tools);
        let messages = session.conversation.to_messages(&system, native);
        let specs = self.registry.specs();

        let mut request = ChatRequest::new(&messages);
        if native && offer_tools {
            request = request.with_tools(&specs);
        }

        let response = self
            .provider
            .chat(request, &self.model, self.temperature)
            .await
            .with_context(|| format!("{} request failed", self.provider.name()))?;

        let used = session.conversation.record_usage(&response);
        self.observer
            .on_token_usage(used, session.conversation.budget());
        Ok(response)
    }

    /// Process one user input to a final answer.
    ///
    /// A transport error ends the turn early and is returned; the user
    /// input stays in history unanswered. Tool failures never end a turn:
    /// they are reported back to the model as error outcomes.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        input: &str,
        automode: Option<AutomodeProgress>,
    ) -> anyhow::Result<TurnReply> {
        session.conversation.enforce_budget();
        session.conversation.push_user(input);

        let response = self.send(session, automode, true).await?;
        let native = self.native_tools();

        let calls = match CallSource::of(&response, native) {
            Some(source) => requested_calls(source),
            None => Vec::new(),
        };

        if calls.is_empty() {
            let text = match response.text_or_empty() {
                "" => EMPTY_REPLY.to_string(),
                text => text.to_string(),
            };
            session.conversation.push_assistant(text.as_str());
            return Ok(self.reply(text, 0));
        }

        let executed = calls.len();
        session.conversation.push_tool_request(
            response.text_or_empty(),
            calls.iter().map(|(call, _)| call.clone()).collect(),
        );

        let executor = ToolExecutor::new(&self.registry);
        for (call, parsed) in &calls {
            tracing::info!(tool = %call.name, "tool requested");
            let outcome = executor.execute_parsed(parsed, &mut session.tools).await;
            self.observer
                .on_tool_call(&call.name, &call.arguments, &outcome);
            session
                .conversation
                .push_tool_result(&call.id, call.name.as_str(), outcome)?;
        }

        let follow_up = self.send(session, automode, false).await?;
        let text = match follow_up.text_or_empty() {
            "" => EMPTY_FOLLOW_UP.to_string(),
            text => text.to_string(),
        };
        session.conversation.push_assistant(text.as_str());
        Ok(self.reply(text, executed))
    }

    fn reply(&self, text: String, tool_calls: usize) -> TurnReply {
        let completed = text.contains(&self.completion_sentinel);
        TurnReply {
            text,
            tool_calls,
            completed,
        }
    }
}

/// Pair each call as it will be recorded in history with its decoded form.
/// Marker-path calls get a generated id so results can be matched to them.
fn requested_calls(source: CallSource<'_>) -> Vec<(ToolCall, ParsedCall)> {
    match source {
        CallSource::Structured(raw) => raw.iter().cloned().zip(source.parse()).collect(),
        CallSource::Marker(_) => source
            .parse()
            .into_iter()
            .map(|parsed| {
                let call = match &parsed {
                    Ok(invocation) => ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        name: invocation.name.clone(),
                        arguments: serde_json::Value::Object(invocation.arguments.clone())
                            .to_string(),
                    },
                    Err(failure) => ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        name: failure.name.clone(),
                        arguments: String::new(),
                    },
                };
                (call, parsed)
            })
            .collect(),
    }
}
