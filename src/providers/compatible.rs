//! Generic OpenAI-compatible provider.
//! OpenAI, Ollama and most self-hosted gateways accept the same
//! `/chat/completions` request shape, so one implementation serves all of them.

use crate::providers::traits::{
    ChatMessage, ChatRequest as ProviderChatRequest, ChatResponse as ProviderChatResponse,
    Provider, TokenUsage, ToolCall as ProviderToolCall,
};
use crate::tools::ToolSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub struct OpenAiCompatibleProvider {
    pub(crate) name: String,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    /// Local servers (Ollama) accept requests without credentials.
    requires_key: bool,
    native_tools: bool,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            requires_key: true,
            native_tools: true,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// A keyless local endpoint. Tool calls are negotiated through text
    /// markers because small local models rarely honour `tools`.
    pub fn local(name: &str, base_url: &str) -> Self {
        Self {
            requires_key: false,
            native_tools: false,
            ..Self::new(name, base_url, None)
        }
    }

    pub fn with_native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }

    /// Build the full URL for chat completions, detecting if base_url already includes the path.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| self.base_url.ends_with("/chat/completions"));

        if has_full_endpoint {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn apply_auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(api_key) = self.api_key.as_deref() else {
            return req;
        };
        req.header("Authorization", format!("Bearer {api_key}"))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    function: Option<Function>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Function {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

fn tool_spec_to_wire(spec: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

fn message_to_wire(message: &ChatMessage) -> Message {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| ToolCall {
                id: Some(call.id.clone()),
                kind: Some("function".to_string()),
                function: Some(Function {
                    name: Some(call.name.clone()),
                    arguments: Some(call.arguments.clone()),
                }),
            })
            .collect()
    });
    Message {
        role: message.role.clone(),
        content: message.content.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Build the request body. Tool offers are attached only when the endpoint
/// handles them natively; marker-mode endpoints see the catalogue in the
/// system prompt instead.
fn build_request_body(
    request: &ProviderChatRequest<'_>,
    model: &str,
    temperature: f64,
    native_tools: bool,
) -> ChatRequest {
    let tools = request
        .tools
        .filter(|_| native_tools)
        .map(|specs| specs.iter().map(tool_spec_to_wire).collect::<Vec<_>>());
    let tool_choice = tools.as_ref().map(|_| "auto");

    ChatRequest {
        model: model.to_string(),
        messages: request.messages.iter().map(message_to_wire).collect(),
        temperature,
        stream: false,
        tools,
        tool_choice,
    }
}

fn parse_response(name: &str, response: ApiChatResponse) -> anyhow::Result<ProviderChatResponse> {
    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No response from {name}"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let function = tc.function?;
            let name = function.name?;
            Some(ProviderToolCall {
                id: tc.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name,
                arguments: function.arguments.unwrap_or_default(),
            })
        })
        .collect();

    Ok(ProviderChatResponse {
        text: choice.message.content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        request: ProviderChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ProviderChatResponse> {
        if self.requires_key && self.api_key.is_none() {
            anyhow::bail!(
                "{} API key not set. Set api_key in config.toml or export TOOLSMITH_API_KEY.",
                self.name
            );
        }

        let body = build_request_body(&request, model, temperature, self.native_tools);
        let url = self.chat_completions_url();
        tracing::debug!(
            provider = %self.name,
            model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "sending chat request"
        );

        let response = self
            .apply_auth_header(self.client.post(&url).json(&body))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.name, response).await);
        }

        let chat_response: ApiChatResponse = response.json().await?;
        parse_response(&self.name, chat_response)
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    fn name(&self) -> &str {
        &self.name
    }
}
