use super::apply::apply_blocks;
use super::blocks::{parse_blocks, EditBlock};
use crate::providers::Provider;
use crate::tools::context::ToolContext;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// Everything the editing model is shown for one attempt.
pub struct EditRequest<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub instructions: &'a str,
    pub project_context: &'a str,
    pub memory: &'a [String],
    pub other_files: &'a BTreeMap<String, String>,
}

/// Produces raw search/replace text for an edit request.
#[async_trait]
pub trait EditProposer: Send + Sync {
    async fn propose(&self, request: &EditRequest<'_>) -> anyhow::Result<String>;
}

/// Proposer backed by a chat model in the "code editor" role.
pub struct ModelEditProposer {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
}

impl ModelEditProposer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }
}

pub(crate) fn editor_system_prompt(request: &EditRequest<'_>) -> String {
    let mut memory = String::new();
    for (i, entry) in request.memory.iter().enumerate() {
        let _ = writeln!(memory, "Memory {}:\n{entry}", i + 1);
    }
    let mut files = String::new();
    for (path, content) in request.other_files {
        let _ = write!(files, "--- {path} ---\n{content}\n\n");
    }

    format!(
        "You generate edit instructions for a single source file as SEARCH/REPLACE blocks.\n\n\
         File: {path}\n\
         Current content:\n{content}\n\n\
         Instructions:\n{instructions}\n\n\
         Project context:\n{project}\n\n\
         Previous edits:\n{memory}\n\
         Other files in context:\n{files}\n\
         Each SEARCH section must copy the existing code exactly, with enough \
         surrounding lines to be unique. Each REPLACE section holds the new code \
         with correct indentation. Keep changes targeted.\n\n\
         Return ONLY blocks in this format, with no explanations:\n\n\
         <SEARCH>\ncode to be replaced\n</SEARCH>\n<REPLACE>\nnew code\n</REPLACE>\n\n\
         If no changes are needed, return nothing.",
        path = request.path,
        content = request.content,
        instructions = request.instructions,
        project = request.project_context,
    )
}

#[async_trait]
impl EditProposer for ModelEditProposer {
    async fn propose(&self, request: &EditRequest<'_>) -> anyhow::Result<String> {
        let system = editor_system_prompt(request);
        self.provider
            .chat_with_system(
                Some(&system),
                "Generate SEARCH/REPLACE blocks for the necessary changes.",
                &self.model,
                self.temperature,
            )
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStatus {
    /// Every proposed block landed.
    Applied,
    /// Some blocks landed; others never matched within the attempt ceiling.
    Partial,
    /// The first proposal contained no blocks.
    NoChanges,
    /// Blocks were proposed but none ever matched. Nothing was written.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub status: EditStatus,
    pub path: String,
    pub attempts: usize,
    pub applied: usize,
    pub failed: Vec<EditBlock>,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl EditOutcome {
    pub fn render(&self) -> String {
        let path = &self.path;
        match self.status {
            EditStatus::NoChanges => format!("No changes suggested for {path}"),
            EditStatus::Failed => format!(
                "No changes could be applied to {path} after {} attempts. \
                 Please review the edit instructions and try again.",
                self.attempts
            ),
            EditStatus::Applied | EditStatus::Partial => {
                let mut out = format!(
                    "Changes applied to {path}:\n  Lines added: {}\n  Lines removed: {}\n",
                    self.lines_added, self.lines_removed
                );
                if !self.failed.is_empty() {
                    let _ = writeln!(
                        out,
                        "{} edit(s) could not be applied after {} attempts:",
                        self.failed.len(),
                        self.attempts
                    );
                    out.push_str(&describe_failures(&self.failed));
                }
                out
            }
        }
    }
}

fn describe_failures(failed: &[EditBlock]) -> String {
    failed
        .iter()
        .enumerate()
        .map(|(i, block)| format!("Edit {}: {}", i + 1, block.search))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Count inserted and deleted lines between two texts.
pub fn diff_counts(before: &str, after: &str) -> (usize, usize) {
    use similar::{ChangeTag, TextDiff};
    TextDiff::from_lines(before, after)
        .iter_all_changes()
        .fold((0, 0), |(added, removed), change| match change.tag() {
            ChangeTag::Insert => (added + 1, removed),
            ChangeTag::Delete => (added, removed + 1),
            ChangeTag::Equal => (added, removed),
        })
}

/// Bounded propose/apply/retry loop for one file.
#[derive(Debug, Clone, Copy)]
pub struct EditFlow {
    pub max_attempts: usize,
}

impl Default for EditFlow {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl EditFlow {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Edit `path` according to `instructions`.
    ///
    /// Content comes from the session cache when the file has been seen,
    /// otherwise from disk. Blocks that fail to match are sent back to the
    /// proposer with the next attempt; content changes carry across attempts.
    /// The file is written once, at the end, and only if something applied.
    pub async fn run(
        &self,
        proposer: &dyn EditProposer,
        ctx: &mut ToolContext,
        path: &str,
        instructions: &str,
        project_context: &str,
    ) -> anyhow::Result<EditOutcome> {
        let full_path = ctx.resolve(path);
        let key = ctx.file_key(path);
        let original = match ctx.cached_file(path) {
            Some(cached) if !cached.is_empty() => cached.to_string(),
            _ => tokio::fs::read_to_string(&full_path)
                .await
                .with_context(|| format!("failed to read {path}"))?,
        };

        let mut current = original.clone();
        let mut applied_total = 0;
        let mut pending: Vec<EditBlock> = Vec::new();
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;

            let request_instructions = if pending.is_empty() {
                instructions.to_string()
            } else {
                format!(
                    "{instructions}\n\nPlease retry the following edits that could not be applied:\n{}",
                    describe_failures(&pending)
                )
            };

            // The file being edited is already shown as "current content".
            let other_files: BTreeMap<String, String> = ctx
                .files
                .iter()
                .filter(|(p, _)| **p != key || !ctx.editor_files.contains(&key))
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect();

            let raw = proposer
                .propose(&EditRequest {
                    path,
                    content: &current,
                    instructions: &request_instructions,
                    project_context,
                    memory: &ctx.editor_memory,
                    other_files: &other_files,
                })
                .await
                .context("edit proposal failed")?;

            ctx.editor_memory
                .push(format!("Edit Instructions for {path}:\n{raw}"));
            if !ctx.editor_files.contains(&key) {
                ctx.editor_files.push(key.clone());
            }

            let blocks = parse_blocks(&raw);
            tracing::info!(path, attempt = attempts, blocks = blocks.len(), "edit proposal received");

            if blocks.is_empty() {
                if attempts == 1 {
                    return Ok(EditOutcome {
                        status: EditStatus::NoChanges,
                        path: path.to_string(),
                        attempts,
                        applied: 0,
                        failed: Vec::new(),
                        lines_added: 0,
                        lines_removed: 0,
                    });
                }
                // A retry with nothing to offer ends the loop; earlier failures stand.
                break;
            }

            let report = apply_blocks(&current, &blocks);
            current = report.content;
            applied_total += report.applied;
            pending = report.failed;

            if pending.is_empty() {
                break;
            }
            tracing::warn!(path, attempt = attempts, failed = pending.len(), "edit blocks did not match");
        }

        if applied_total == 0 {
            return Ok(EditOutcome {
                status: EditStatus::Failed,
                path: path.to_string(),
                attempts,
                applied: 0,
                failed: pending,
                lines_added: 0,
                lines_removed: 0,
            });
        }

        tokio::fs::write(&full_path, &current)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        let (lines_added, lines_removed) = diff_counts(&original, &current);
        ctx.remember_file(path, current);

        Ok(EditOutcome {
            status: if pending.is_empty() {
                EditStatus::Applied
            } else {
                EditStatus::Partial
            },
            path: path.to_string(),
            attempts,
            applied: applied_total,
            failed: pending,
            lines_added,
            lines_removed,
        })
    }
}
