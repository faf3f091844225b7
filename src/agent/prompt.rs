//! System prompt assembly.
//!
//! The prompt is rebuilt for every request from ordered sections, so file
//! contents and automode progress are always current.

use crate::tools::parser::{CALL_MARKER, INPUT_MARKER};
use crate::tools::ToolSpec;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Automode progress shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomodeProgress {
    pub iteration: usize,
    pub max_iterations: usize,
}

/// Everything a section may draw on.
pub struct PromptContext<'a> {
    pub files: &'a BTreeMap<String, String>,
    pub tools: &'a [ToolSpec],
    /// Tools are described in text and called with markers.
    pub marker_mode: bool,
    /// False for the follow-up after a tool round, which must be answered
    /// in prose.
    pub offer_tools: bool,
    pub automode: Option<AutomodeProgress>,
    pub completion_sentinel: &'a str,
}

/// One section of the system prompt.
pub trait PromptSection: Send + Sync {
    fn name(&self) -> &str;
    /// `None` leaves the section out of this request's prompt.
    fn render(&self, ctx: &PromptContext<'_>) -> Option<String>;
}

pub struct IdentitySection;

impl PromptSection for IdentitySection {
    fn name(&self) -> &str {
        "identity"
    }

    fn render(&self, _ctx: &PromptContext<'_>) -> Option<String> {
        Some(
            "You are an engineering assistant working inside the user's project directory. \
             You can create folders and files, read files, list directories, edit files by \
             instructing a separate code-editing model, run Python code in the isolated \
             'code_execution_env' virtual environment, manage the background processes it \
             starts, and search the web.\n\n\
             Guidelines:\n\
             - Pick the most specific tool for each step and fill in every required parameter. \
             If a required value cannot be inferred, ask the user instead of guessing.\n\
             - For edit_and_apply, give complete instructions: which code to change, how, and \
             how the file relates to the rest of the project.\n\
             - Read a file before editing it and check the result afterwards.\n\
             - When a tool reports an error, read it, fix the cause and retry with corrected \
             arguments, or explain why you cannot.\n\
             - Long-running code should run in the background; stop processes you no longer \
             need with stop_process.\n\
             - Start new projects by creating a root folder and organizing files beneath it."
                .to_string(),
        )
    }
}

pub struct FileContentsSection;

impl PromptSection for FileContentsSection {
    fn name(&self) -> &str {
        "file_contents"
    }

    fn render(&self, ctx: &PromptContext<'_>) -> Option<String> {
        let mut out = String::from("File Contents:\n");
        for (path, content) in ctx.files {
            let _ = write!(out, "\n--- {path} ---\n{content}\n");
        }
        Some(out)
    }
}

/// Tool catalogue and call convention for endpoints without native tools.
pub struct ToolCatalogueSection;

impl PromptSection for ToolCatalogueSection {
    fn name(&self) -> &str {
        "tools"
    }

    fn render(&self, ctx: &PromptContext<'_>) -> Option<String> {
        if !ctx.marker_mode {
            return None;
        }
        if !ctx.offer_tools {
            return Some(
                "Tools are not available for this reply. Summarize the tool results above \
                 for the user in plain language."
                    .to_string(),
            );
        }
        let mut out = String::from("Available Tools:\n");
        if ctx.tools.is_empty() {
            out.push_str("No tools available.\n");
        }
        for spec in ctx.tools {
            let schema = serde_json::to_string_pretty(&spec.parameters).unwrap_or_default();
            let _ = write!(
                out,
                "\nTool: {}\nDescription: {}\nSchema: {schema}\n",
                spec.name, spec.description
            );
        }
        let _ = write!(
            out,
            "\nTo call a tool, answer with exactly these two lines and nothing after them:\n\
             {CALL_MARKER} tool_name\n\
             {INPUT_MARKER} {{\"param\": \"value\"}}\n\
             The input must be a single-line JSON object. Call at most one tool per reply."
        );
        Some(out)
    }
}

pub struct AutomodeSection;

impl PromptSection for AutomodeSection {
    fn name(&self) -> &str {
        "automode"
    }

    fn render(&self, ctx: &PromptContext<'_>) -> Option<String> {
        let progress = ctx.automode?;
        let sentinel = ctx.completion_sentinel;
        Some(format!(
            "You are running in automode and continue without user input between turns.\n\
             - Break the user's request into concrete goals and work through them one at a time.\n\
             - Report progress briefly after each step.\n\
             - Prefer edit_and_apply for changes to existing files, in small chunks for large edits.\n\
             - If a step keeps failing, try a different approach.\n\
             - When every goal is done, reply with \"{sentinel}\". Do not ask for further tasks.\n\
             You are currently on iteration {} out of {} in automode.",
            progress.iteration, progress.max_iterations
        ))
    }
}

/// Ordered list of sections joined with blank lines.
pub struct SystemPromptBuilder {
    sections: Vec<Box<dyn PromptSection>>,
}

impl Default for SystemPromptBuilder {
    fn default() -> Self {
        Self {
            sections: vec![
                Box::new(IdentitySection),
                Box::new(ToolCatalogueSection),
                Box::new(FileContentsSection),
                Box::new(AutomodeSection),
            ],
        }
    }
}

impl SystemPromptBuilder {
    pub fn empty() -> Self {
        Self {
            sections: Vec::new(),
        }
    }

    pub fn add_section(mut self, section: Box<dyn PromptSection>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name()).collect()
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        self.sections
            .iter()
            .filter_map(|section| section.render(ctx))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        }
    }

    fn ctx<'a>(
        files: &'a BTreeMap<String, String>,
        tools: &'a [ToolSpec],
        marker_mode: bool,
        automode: Option<AutomodeProgress>,
    ) -> PromptContext<'a> {
        PromptContext {
            files,
            tools,
            marker_mode,
            offer_tools: true,
            automode,
            completion_sentinel: "AUTOMODE_COMPLETE",
        }
    }

    #[test]
    fn native_prompt_omits_catalogue() {
        let files = BTreeMap::new();
        let tools = vec![spec()];
        let prompt = SystemPromptBuilder::default().build(&ctx(&files, &tools, false, None));
        assert!(!prompt.contains("TOOL_CALL:"));
        assert!(prompt.contains("File Contents:"));
        assert!(!prompt.contains("automode"));
    }

    #[test]
    fn marker_prompt_lists_tools_and_convention() {
        let files = BTreeMap::new();
        let tools = vec![spec()];
        let prompt = SystemPromptBuilder::default().build(&ctx(&files, &tools, true, None));
        assert!(prompt.contains("Tool: read_file\nDescription: Read a file"));
        assert!(prompt.contains("TOOL_CALL: tool_name\nTOOL_INPUT: {\"param\": \"value\"}"));
    }

    #[test]
    fn marker_follow_up_asks_for_prose_instead_of_calls() {
        let files = BTreeMap::new();
        let tools = vec![spec()];
        let mut context = ctx(&files, &tools, true, None);
        context.offer_tools = false;
        let prompt = SystemPromptBuilder::default().build(&context);
        assert!(!prompt.contains("TOOL_CALL:"));
        assert!(!prompt.contains("Tool: read_file"));
        assert!(prompt.contains("Tools are not available for this reply."));
    }

    #[test]
    fn file_contents_are_rendered() {
        let mut files = BTreeMap::new();
        files.insert("a.txt".to_string(), "hi".to_string());
        let prompt = SystemPromptBuilder::default().build(&ctx(&files, &[], false, None));
        assert!(prompt.contains("--- a.txt ---\nhi"));
    }

    #[test]
    fn automode_block_carries_iteration() {
        let files = BTreeMap::new();
        let progress = AutomodeProgress {
            iteration: 2,
            max_iterations: 5,
        };
        let prompt =
            SystemPromptBuilder::default().build(&ctx(&files, &[], false, Some(progress)));
        assert!(prompt.contains("iteration 2 out of 5"));
        assert!(prompt.contains("\"AUTOMODE_COMPLETE\""));
    }

    #[test]
    fn custom_sections_append_in_order() {
        struct Fixed;
        impl PromptSection for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn render(&self, _ctx: &PromptContext<'_>) -> Option<String> {
                Some("FIXED".into())
            }
        }
        let builder = SystemPromptBuilder::empty()
            .add_section(Box::new(IdentitySection))
            .add_section(Box::new(Fixed));
        assert_eq!(builder.section_names(), vec!["identity", "fixed"]);
        let files = BTreeMap::new();
        assert!(builder.build(&ctx(&files, &[], false, None)).ends_with("FIXED"));
    }
}
