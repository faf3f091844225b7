use super::blocks::EditBlock;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static STRAY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?SEARCH>|</?REPLACE>").expect("stray tag pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub content: String,
    pub applied: usize,
    pub failed: Vec<EditBlock>,
    /// Repeats of an earlier block in the same batch, not attempted.
    pub duplicates: usize,
}

/// Apply blocks in order against `content`.
///
/// Each block is located exactly first, then line by line ignoring trailing
/// whitespace, then ignoring all surrounding whitespace. A block that cannot
/// be located is recorded as failed and the rest are still applied.
pub fn apply_blocks(content: &str, blocks: &[EditBlock]) -> ApplyReport {
    let mut current = content.to_string();
    let mut applied = 0;
    let mut failed = Vec::new();
    let mut duplicates = 0;
    let mut seen: HashSet<&EditBlock> = HashSet::new();

    for block in blocks {
        if !seen.insert(block) {
            duplicates += 1;
            continue;
        }
        match apply_one(&current, block) {
            Some(next) => {
                current = next;
                applied += 1;
            }
            None => {
                tracing::debug!(search = %crate::util::truncate_with_ellipsis(&block.search, 60), "edit block not found");
                failed.push(block.clone());
            }
        }
    }

    ApplyReport {
        content: current,
        applied,
        failed,
        duplicates,
    }
}

fn apply_one(content: &str, block: &EditBlock) -> Option<String> {
    if block.search.trim().is_empty() {
        return None;
    }
    let replacement = STRAY_TAG_RE.replace_all(&block.replace, "");

    if let Some(start) = content.find(&block.search) {
        let end = start + block.search.len();
        return Some(splice(content, start, end, &replacement));
    }

    let window = find_line_window(content, &block.search, str::trim_end)
        .or_else(|| find_line_window(content, &block.search, str::trim))?;

    // Whole lines were matched; carry the first line's indentation over when
    // the replacement arrived without any.
    let indent = leading_whitespace(&content[window.0..window.1]);
    let replacement = if !replacement.is_empty() && leading_whitespace(&replacement).is_empty() {
        format!("{indent}{replacement}")
    } else {
        replacement.into_owned()
    };
    Some(splice(content, window.0, window.1, &replacement))
}

fn splice(content: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..start]);
    out.push_str(replacement);
    out.push_str(&content[end..]);
    out
}

fn leading_whitespace(s: &str) -> &str {
    &s[..s.len() - s.trim_start().len()]
}

/// Byte spans of each line, excluding the line terminator.
fn line_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for line in content.split_inclusive('\n') {
        let body = line.strip_suffix('\n').unwrap_or(line);
        let body = body.strip_suffix('\r').unwrap_or(body);
        spans.push((start, start + body.len()));
        start += line.len();
    }
    spans
}

/// Find consecutive lines equal to the search lines under `normalize`.
/// Returns the byte range from the first line's start to the last line's end.
fn find_line_window(
    content: &str,
    search: &str,
    normalize: fn(&str) -> &str,
) -> Option<(usize, usize)> {
    let needle: Vec<&str> = search.lines().map(normalize).collect();
    if needle.is_empty() {
        return None;
    }
    let spans = line_spans(content);
    if spans.len() < needle.len() {
        return None;
    }

    (0..=spans.len() - needle.len()).find_map(|first| {
        let window = &spans[first..first + needle.len()];
        let matches = window
            .iter()
            .zip(&needle)
            .all(|(&(s, e), want)| normalize(&content[s..e]) == *want);
        matches.then(|| (window[0].0, window[window.len() - 1].1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_spliced() {
        let report = apply_blocks("a = 1\nb = 2\n", &[EditBlock::new("b = 2", "b = 3")]);
        assert_eq!(report.content, "a = 1\nb = 3\n");
        assert_eq!(report.applied, 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn missing_search_leaves_content_unchanged() {
        let original = "fn main() {}\n";
        let report = apply_blocks(original, &[EditBlock::new("fn other() {}", "x")]);
        assert_eq!(report.content, original);
        assert_eq!(report.applied, 0);
        assert_eq!(report.failed, vec![EditBlock::new("fn other() {}", "x")]);
    }

    #[test]
    fn failed_block_does_not_stop_others() {
        let report = apply_blocks(
            "one\ntwo\nthree\n",
            &[
                EditBlock::new("one", "1"),
                EditBlock::new("missing", "?"),
                EditBlock::new("three", "3"),
            ],
        );
        assert_eq!(report.content, "1\ntwo\n3\n");
        assert_eq!(report.applied, 2);
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn duplicate_block_applied_once() {
        let block = EditBlock::new("x", "xx");
        let report = apply_blocks("x\n", &[block.clone(), block]);
        assert_eq!(report.content, "xx\n");
        assert_eq!(report.applied, 1);
        assert_eq!(report.duplicates, 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn trailing_whitespace_is_tolerated() {
        let content = "def f():   \n    return 1  \n";
        let report = apply_blocks(
            content,
            &[EditBlock::new("def f():\n    return 1", "def f():\n    return 2")],
        );
        assert_eq!(report.applied, 1);
        assert_eq!(report.content, "def f():\n    return 2\n");
    }

    #[test]
    fn indentation_differences_are_tolerated() {
        let content = "class A:\n    def f(self):\n        return 1\n";
        let report = apply_blocks(
            content,
            &[EditBlock::new(
                "def f(self):\n  return 1",
                "def f(self):\n        return 2",
            )],
        );
        assert_eq!(report.applied, 1);
        assert_eq!(
            report.content,
            "class A:\n    def f(self):\n        return 2\n"
        );
    }

    #[test]
    fn stray_tags_are_stripped_from_replacement() {
        let report = apply_blocks("a\n", &[EditBlock::new("a", "b</REPLACE>")]);
        assert_eq!(report.content, "b\n");
    }

    #[test]
    fn empty_search_fails() {
        let report = apply_blocks("a\n", &[EditBlock::new("  ", "b")]);
        assert_eq!(report.content, "a\n");
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn crlf_lines_match() {
        let report = apply_blocks(
            "a \r\nb\r\n",
            &[EditBlock::new("a\nb", "c")],
        );
        assert_eq!(report.content, "c\r\n");
    }
}
