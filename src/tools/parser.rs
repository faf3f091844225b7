//! Extraction of tool invocations from model responses.
//!
//! Two paths feed the same [`ToolInvocation`] type:
//!
//! * **structured**: the endpoint returned `tool_calls`, each carrying raw
//!   JSON argument text. Undecodable arguments are a parse failure that the
//!   executor reports back to the model.
//! * **marker**: the model wrote `TOOL_CALL: <name>` and
//!   `TOOL_INPUT: <json>` lines in plain text. Undecodable JSON falls back to
//!   an empty argument map, which keeps small local models usable.

use super::error::ToolError;
use crate::providers::{ChatResponse, ToolCall};
use serde_json::{Map, Value};

pub const CALL_MARKER: &str = "TOOL_CALL:";
pub const INPUT_MARKER: &str = "TOOL_INPUT:";

/// A decoded call ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Provider-assigned call id. `None` for marker-path calls.
    pub id: Option<String>,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// A structured call whose arguments could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub id: Option<String>,
    pub name: String,
    pub error: ToolError,
}

pub type ParsedCall = Result<ToolInvocation, ParseFailure>;

/// Where a response's tool calls come from.
#[derive(Debug, Clone, Copy)]
pub enum CallSource<'a> {
    Structured(&'a [ToolCall]),
    Marker(&'a str),
}

impl<'a> CallSource<'a> {
    /// Pick the extraction path for a response. Structured calls win when
    /// present; otherwise marker-mode endpoints have their text scanned.
    pub fn of(response: &'a ChatResponse, native_tools: bool) -> Option<Self> {
        if response.has_tool_calls() {
            Some(Self::Structured(&response.tool_calls))
        } else if !native_tools {
            Some(Self::Marker(response.text_or_empty()))
        } else {
            None
        }
    }

    /// Decode every call this source carries, in order.
    pub fn parse(self) -> Vec<ParsedCall> {
        match self {
            Self::Structured(calls) => parse_structured(calls),
            Self::Marker(text) => parse_markers(text).map(Ok).into_iter().collect(),
        }
    }
}

/// Decode each structured call. Empty argument text means "no arguments".
pub fn parse_structured(calls: &[ToolCall]) -> Vec<ParsedCall> {
    calls.iter().map(parse_one_structured).collect()
}

fn parse_one_structured(call: &ToolCall) -> ParsedCall {
    let failure = |reason: String| ParseFailure {
        id: Some(call.id.clone()),
        name: call.name.clone(),
        error: ToolError::Parse {
            tool: call.name.clone(),
            reason,
        },
    };

    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(ToolInvocation {
            id: Some(call.id.clone()),
            name: call.name.clone(),
            arguments: Map::new(),
        });
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(ToolInvocation {
            id: Some(call.id.clone()),
            name: call.name.clone(),
            arguments,
        }),
        Ok(other) => Err(failure(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(failure(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Scan text for a marker-path call. Both markers must appear; when either is
/// repeated the last occurrence wins.
pub fn parse_markers(text: &str) -> Option<ToolInvocation> {
    let mut name: Option<&str> = None;
    let mut input: Option<&str> = None;

    for line in text.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix(CALL_MARKER) {
            name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix(INPUT_MARKER) {
            input = Some(rest.trim());
        }
    }

    let name = name.filter(|n| !n.is_empty())?;
    let input = input?;

    let arguments = match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(map)) => map,
        _ => {
            tracing::debug!(tool = name, "marker input is not a JSON object; using empty arguments");
            Map::new()
        }
    };

    Some(ToolInvocation::new(name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn marker_round_trip() {
        let text = "Let me do that.\nTOOL_CALL: X\nTOOL_INPUT: {\"a\":1}\n";
        let parsed = parse_markers(text).unwrap();
        assert_eq!(parsed.name, "X");
        assert_eq!(Value::Object(parsed.arguments), json!({"a": 1}));
        assert!(parsed.id.is_none());
    }

    #[test]
    fn marker_malformed_json_defaults_to_empty_arguments() {
        let text = "TOOL_CALL: X\nTOOL_INPUT: {not json";
        let parsed = parse_markers(text).unwrap();
        assert_eq!(parsed.name, "X");
        assert!(parsed.arguments.is_empty());
    }

    #[test]
    fn marker_non_object_json_defaults_to_empty_arguments() {
        let parsed = parse_markers("TOOL_CALL: X\nTOOL_INPUT: [1,2]").unwrap();
        assert!(parsed.arguments.is_empty());
    }

    #[test]
    fn marker_last_occurrence_wins() {
        let text = "TOOL_CALL: first\nTOOL_INPUT: {\"a\":1}\nTOOL_CALL: second\nTOOL_INPUT: {\"b\":2}";
        let parsed = parse_markers(text).unwrap();
        assert_eq!(parsed.name, "second");
        assert_eq!(Value::Object(parsed.arguments), json!({"b": 2}));
    }

    #[test]
    fn marker_requires_both_lines() {
        assert!(parse_markers("TOOL_CALL: X").is_none());
        assert!(parse_markers("TOOL_INPUT: {}").is_none());
        assert!(parse_markers("just an answer").is_none());
    }

    #[test]
    fn marker_ignores_indentation() {
        let parsed = parse_markers("  TOOL_CALL: list_files\n\tTOOL_INPUT: {}").unwrap();
        assert_eq!(parsed.name, "list_files");
    }

    #[test]
    fn marker_must_start_the_line() {
        assert!(parse_markers("use TOOL_CALL: X\nand TOOL_INPUT: {}").is_none());
    }

    #[test]
    fn structured_decodes_in_order() {
        let calls = vec![
            call("c1", "create_folder", r#"{"path":"src"}"#),
            call("c2", "list_files", ""),
        ];
        let parsed = parse_structured(&calls);
        assert_eq!(parsed.len(), 2);
        let first = parsed[0].as_ref().unwrap();
        assert_eq!(first.id.as_deref(), Some("c1"));
        assert_eq!(first.arguments["path"], "src");
        let second = parsed[1].as_ref().unwrap();
        assert_eq!(second.name, "list_files");
        assert!(second.arguments.is_empty());
    }

    #[test]
    fn structured_invalid_json_is_parse_failure() {
        let parsed = parse_structured(&[call("c1", "create_file", "{broken")]);
        let failure = parsed[0].as_ref().unwrap_err();
        assert_eq!(failure.id.as_deref(), Some("c1"));
        assert!(matches!(failure.error, ToolError::Parse { ref tool, .. } if tool == "create_file"));
    }

    #[test]
    fn structured_non_object_is_parse_failure() {
        let parsed = parse_structured(&[call("c1", "read_file", "\"a.txt\"")]);
        let failure = parsed[0].as_ref().unwrap_err();
        assert!(failure.error.to_string().contains("expected a JSON object"));
    }

    #[test]
    fn call_source_prefers_structured_calls() {
        let response = ChatResponse {
            text: Some("TOOL_CALL: ignored\nTOOL_INPUT: {}".into()),
            tool_calls: vec![call("c1", "list_files", "{}")],
            usage: None,
        };
        let parsed = CallSource::of(&response, false).unwrap().parse();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].as_ref().unwrap().name, "list_files");
    }

    #[test]
    fn call_source_skips_markers_for_native_endpoints() {
        let response = ChatResponse {
            text: Some("TOOL_CALL: x\nTOOL_INPUT: {}".into()),
            ..ChatResponse::default()
        };
        assert!(CallSource::of(&response, true).is_none());
        let parsed = CallSource::of(&response, false).unwrap().parse();
        assert_eq!(parsed[0].as_ref().unwrap().name, "x");
    }
}
