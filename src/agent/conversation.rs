//! Ordered turn log plus the running token estimate.

use crate::providers::{ChatMessage, ChatResponse, ToolCall};
use crate::tools::ToolOutcome;
use thiserror::Error;

/// Remaining-token level below which the user is warned.
pub const LOW_BUDGET_WARNING: u64 = 20_000;

const INTERRUPTED_CALL: &str = "Error: the tool call was interrupted before it produced a result.";

#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Assistant(String),
    /// The model asked for tools. `text` is whatever prose came with the
    /// request; on the marker path it holds the markers themselves.
    ToolRequest { text: String, calls: Vec<ToolCall> },
    ToolResult {
        call_id: String,
        name: String,
        outcome: ToolOutcome,
    },
}

impl Turn {
    fn text_len_words(&self) -> usize {
        let text = match self {
            Self::User(t) | Self::Assistant(t) => t.as_str(),
            Self::ToolRequest { text, .. } => text.as_str(),
            Self::ToolResult { outcome, .. } => outcome.content.as_str(),
        };
        text.split_whitespace().count()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("tool result for call {call_id} has no matching request in the current turn")]
    UnmatchedToolResult { call_id: String },
}

/// Rough token count for text without provider usage data.
pub fn estimate_tokens(words: usize) -> u64 {
    (words as f64 * 1.3) as u64
}

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    tokens_used: u64,
    budget: u64,
}

impl Conversation {
    pub fn new(budget: u64) -> Self {
        Self {
            turns: Vec::new(),
            tokens_used: 0,
            budget,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.tokens_used)
    }

    pub fn is_running_low(&self) -> bool {
        self.remaining() < LOW_BUDGET_WARNING
    }

    /// Start a new exchange. Calls left unanswered by an abandoned turn are
    /// closed with error results first.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.close_dangling_calls();
        self.turns.push(Turn::User(text.into()));
    }

    fn close_dangling_calls(&mut self) {
        let exchange_start = self
            .turns
            .iter()
            .rposition(|turn| matches!(turn, Turn::User(_)))
            .unwrap_or(0);
        let exchange = &self.turns[exchange_start..];
        let answered: Vec<&str> = exchange
            .iter()
            .filter_map(|turn| match turn {
                Turn::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        let dangling: Vec<ToolCall> = exchange
            .iter()
            .filter_map(|turn| match turn {
                Turn::ToolRequest { calls, .. } => Some(calls),
                _ => None,
            })
            .flatten()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .cloned()
            .collect();

        for call in dangling {
            tracing::warn!(tool = %call.name, call_id = %call.id, "closing unanswered tool call");
            self.turns.push(Turn::ToolResult {
                call_id: call.id,
                name: call.name,
                outcome: ToolOutcome::failure(INTERRUPTED_CALL),
            });
        }
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::Assistant(text.into()));
    }

    pub fn push_tool_request(&mut self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.turns.push(Turn::ToolRequest {
            text: text.into(),
            calls,
        });
    }

    /// Append a tool result. The call must have been requested since the
    /// last user turn.
    pub fn push_tool_result(
        &mut self,
        call_id: &str,
        name: impl Into<String>,
        outcome: ToolOutcome,
    ) -> Result<(), ConversationError> {
        let requested = self
            .turns
            .iter()
            .rev()
            .take_while(|turn| !matches!(turn, Turn::User(_)))
            .any(|turn| match turn {
                Turn::ToolRequest { calls, .. } => calls.iter().any(|c| c.id == call_id),
                _ => false,
            });
        if !requested {
            return Err(ConversationError::UnmatchedToolResult {
                call_id: call_id.to_string(),
            });
        }
        self.turns.push(Turn::ToolResult {
            call_id: call_id.to_string(),
            name: name.into(),
            outcome,
        });
        Ok(())
    }

    /// True when the last turn is a user turn nobody answered.
    pub fn ends_with_unanswered_user(&self) -> bool {
        matches!(self.turns.last(), Some(Turn::User(_)))
    }

    /// Account for one model response. A provider-reported total replaces
    /// the estimate since it already covers the whole prompt; otherwise the
    /// response's words are added.
    pub fn record_usage(&mut self, response: &ChatResponse) -> u64 {
        match response.usage.as_ref().and_then(|u| u.total_tokens) {
            Some(total) => self.tokens_used = total,
            None => {
                let words = response.text_or_empty().split_whitespace().count();
                self.tokens_used += estimate_tokens(words);
            }
        }
        self.tokens_used
    }

    /// Drop the oldest complete exchanges while the estimate is over budget.
    /// An exchange runs from a user turn up to the next one, so tool requests
    /// always leave together with their results. The newest exchange is
    /// never dropped. Returns the number of turns removed.
    pub fn enforce_budget(&mut self) -> usize {
        let mut removed = 0;
        while self.tokens_used > self.budget {
            let starts: Vec<usize> = self
                .turns
                .iter()
                .enumerate()
                .filter(|(_, t)| matches!(t, Turn::User(_)))
                .map(|(i, _)| i)
                .collect();
            if starts.len() < 2 {
                break;
            }
            let end = starts[1];
            let words: usize = self.turns[..end].iter().map(Turn::text_len_words).sum();
            self.turns.drain(..end);
            self.tokens_used = self.tokens_used.saturating_sub(estimate_tokens(words));
            removed += end;
        }
        if removed > 0 {
            tracing::info!(removed, tokens = self.tokens_used, "trimmed conversation history");
        }
        removed
    }

    /// Forget every turn and reset the token estimate.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.tokens_used = 0;
    }

    /// Render the wire messages for one request.
    ///
    /// With native tools, requests and results use `tool_calls` and the
    /// `tool` role. Otherwise requests go out as the assistant's own text and
    /// results as a user message prefixed `Tool result:`.
    pub fn to_messages(&self, system_prompt: &str, native_tools: bool) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        for turn in &self.turns {
            let message = match turn {
                Turn::User(text) => ChatMessage::user(text.as_str()),
                Turn::Assistant(text) => ChatMessage::assistant(text.as_str()),
                Turn::ToolRequest { text, calls } if native_tools => {
                    ChatMessage::assistant_with_tool_calls(text.as_str(), calls.clone())
                }
                Turn::ToolRequest { text, .. } => ChatMessage::assistant(text.as_str()),
                Turn::ToolResult {
                    call_id, outcome, ..
                } if native_tools => ChatMessage::tool(call_id.as_str(), outcome.content.as_str()),
                Turn::ToolResult { outcome, .. } => {
                    ChatMessage::user(format!("Tool result: {}", outcome.content))
                }
            };
            messages.push(message);
        }
        messages
    }
}
