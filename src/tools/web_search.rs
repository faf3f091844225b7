use super::context::ToolContext;
use super::registry::{Dependency, LoadError, ToolEnv};
use super::schema::{object_schema, require_str};
use super::traits::{Tool, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;

/// Web search through the Tavily API.
pub struct TavilySearchTool {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

impl TavilySearchTool {
    /// Factory: requires `[search] api_key` (or `TAVILY_API_KEY`).
    pub fn load(env: &ToolEnv) -> Result<Box<dyn Tool>, LoadError> {
        let search = &env.config.search;
        let api_key = search
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LoadError::MissingDependency(Dependency::Credential("search.api_key".into()))
            })?;
        Ok(Box::new(Self {
            client: env.http.clone(),
            api_key: api_key.to_string(),
            api_url: search.api_url.trim_end_matches('/').to_string(),
            max_results: search.max_results,
        }))
    }

    fn request_body(&self, query: &str) -> Value {
        serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "advanced",
            "include_answer": true,
            "max_results": self.max_results,
        })
    }
}

fn render(response: SearchResponse) -> String {
    let mut out = response.answer.unwrap_or_default();
    if !response.results.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("Sources:");
        for hit in &response.results {
            let _ = write!(out, "\n- {} ({})", hit.title, hit.url);
        }
    }
    if out.is_empty() {
        out.push_str("No results found.");
    }
    out
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Perform a web search using the Tavily API"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(&[("query", "string", "The search query")], &["query"])
    }

    async fn execute(&self, args: Value, _ctx: &mut ToolContext) -> anyhow::Result<ToolResult> {
        let query = require_str(&args, "query")?;
        let response = self
            .client
            .post(format!("{}/search", self.api_url))
            .json(&self.request_body(query))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::fail(format!("Error performing search: {e}"))),
        };
        if !response.status().is_success() {
            let err = crate::providers::api_error("Tavily", response).await;
            return Ok(ToolResult::fail(format!("Error performing search: {err}")));
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(ToolResult::ok(render(parsed)))
    }
}
