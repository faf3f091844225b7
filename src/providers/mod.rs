//! Provider subsystem for model inference backends.
//!
//! Every backend speaks the OpenAI-compatible chat completions dialect and is
//! built by [`create_provider`] from its canonical key. Endpoints that do not
//! accept structured tool schemas run in marker mode (see
//! [`Provider::supports_native_tools`]).

pub mod compatible;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use traits::{
    ChatMessage, ChatRequest, ChatResponse, Provider, TokenUsage, ToolCall,
};

const MAX_API_ERROR_CHARS: usize = 200;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts tokens with prefixes like `sk-`, `tvly-`, `ghp_` and `github_pat_`.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 6] = ["sk-", "tvly-", "ghp_", "gho_", "ghu_", "github_pat_"];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);
    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }
    format!(
        "{}...",
        crate::util::truncate_chars(&scrubbed, MAX_API_ERROR_CHARS)
    )
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

fn env_nonempty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !trimmed_override.is_empty() {
            return Some(trimmed_override.to_owned());
        }
    }

    let provider_env_candidates: &[&str] = match name {
        "openai" => &["OPENAI_API_KEY"],
        _ => &[],
    };

    provider_env_candidates
        .iter()
        .chain(["TOOLSMITH_API_KEY"].iter())
        .find_map(|var| env_nonempty(var))
}

/// Factory: create the right provider from its key, an optional credential
/// and an optional base URL override.
///
/// Accepted keys: `openai`, `ollama` and `custom:<url>`.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let key = resolve_provider_credential(name, api_key);
    let api_url = api_url.map(str::trim).filter(|u| !u.is_empty());

    match name {
        "openai" => Ok(Box::new(OpenAiCompatibleProvider::new(
            "openai",
            api_url.unwrap_or(OPENAI_BASE_URL),
            key.as_deref(),
        ))),
        "ollama" => Ok(Box::new(OpenAiCompatibleProvider::local(
            "ollama",
            api_url.unwrap_or(OLLAMA_BASE_URL),
        ))),
        custom if custom.starts_with("custom:") => {
            let url = custom.trim_start_matches("custom:").trim();
            if reqwest::Url::parse(url).is_err() {
                anyhow::bail!("Invalid custom provider URL: {url:?}");
            }
            // Custom gateways are assumed OpenAI-grade; a missing key is tolerated.
            let mut provider = OpenAiCompatibleProvider::new("custom", url, key.as_deref());
            if key.is_none() {
                provider = OpenAiCompatibleProvider::local("custom", url).with_native_tools(true);
            }
            Ok(Box::new(provider))
        }
        _ => anyhow::bail!(
            "Unknown provider: {name}. Use \"openai\", \"ollama\" or \"custom:<url>\"."
        ),
    }
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"openai"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
    /// Whether the provider runs locally (no API key required)
    pub local: bool,
    /// Whether tools are offered as structured schemas
    pub native_tools: bool,
}

/// Return the list of all known providers for display in `toolsmith providers`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI",
            local: false,
            native_tools: true,
        },
        ProviderInfo {
            name: "ollama",
            display_name: "Ollama",
            local: true,
            native_tools: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_openai() {
        let p = create_provider("openai", Some("provider-test-credential"), None).unwrap();
        assert_eq!(p.name(), "openai");
        assert!(p.supports_native_tools());
    }

    #[test]
    fn factory_ollama_is_marker_mode() {
        let p = create_provider("ollama", None, None).unwrap();
        assert_eq!(p.name(), "ollama");
        assert!(!p.supports_native_tools());
    }

    #[test]
    fn factory_custom_url() {
        let p = create_provider("custom:http://127.0.0.1:8080/v1", Some("k"), None).unwrap();
        assert_eq!(p.name(), "custom");
        assert!(p.supports_native_tools());
    }

    #[test]
    fn factory_custom_rejects_bad_url() {
        assert!(create_provider("custom:not a url", None, None).is_err());
    }

    #[test]
    fn factory_unknown_provider_errors() {
        let msg = create_provider("nonexistent", None, None)
            .err()
            .unwrap()
            .to_string();
        assert!(msg.contains("Unknown provider"));
    }

    #[test]
    fn factory_empty_name_errors() {
        assert!(create_provider("", None, None).is_err());
    }

    #[test]
    fn listed_providers_are_constructible() {
        let mut seen = std::collections::HashSet::new();
        for provider in list_providers() {
            assert!(seen.insert(provider.name), "duplicate {}", provider.name);
            let built = create_provider(provider.name, Some("provider-test-credential"), None)
                .unwrap();
            assert_eq!(built.supports_native_tools(), provider.native_tools);
        }
    }

    #[test]
    fn sanitize_scrubs_sk_prefix() {
        let out = sanitize_api_error("request failed: sk-1234567890abcdef");
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn sanitize_scrubs_search_key() {
        let out = sanitize_api_error("bad key tvly-abc123");
        assert_eq!(out, "bad key [REDACTED]");
    }

    #[test]
    fn sanitize_truncates_long_error() {
        let result = sanitize_api_error(&"a".repeat(400));
        assert!(result.len() <= 203);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_no_secret_no_change() {
        let input = "simple upstream timeout";
        assert_eq!(sanitize_api_error(input), input);
    }

    #[test]
    fn scrub_github_fine_grained_pat() {
        let result = scrub_secret_patterns("failed: github_pat_11AABBC_xyzzy789");
        assert_eq!(result, "failed: [REDACTED]");
    }

    #[test]
    fn resolve_provider_credential_prefers_explicit_argument() {
        let resolved = resolve_provider_credential("openai", Some("  explicit-key  "));
        assert_eq!(resolved, Some("explicit-key".to_string()));
    }
}
