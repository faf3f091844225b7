use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<SEARCH>(.*?)</SEARCH>\s*<REPLACE>(.*?)</REPLACE>")
        .expect("edit block pattern is valid")
});

/// One search/replace pair proposed by the editing model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditBlock {
    pub search: String,
    pub replace: String,
}

impl EditBlock {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

impl fmt::Display for EditBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<SEARCH>\n{}\n</SEARCH>\n<REPLACE>\n{}\n</REPLACE>",
            self.search, self.replace
        )
    }
}

/// Extract every `<SEARCH>…</SEARCH><REPLACE>…</REPLACE>` pair, in order.
/// Both halves are trimmed. Text with no blocks means "no changes".
pub fn parse_blocks(text: &str) -> Vec<EditBlock> {
    BLOCK_RE
        .captures_iter(text)
        .map(|caps| EditBlock::new(caps[1].trim(), caps[2].trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_concatenated_blocks() {
        let text = "<SEARCH>\nfn a() {}\n</SEARCH>\n<REPLACE>\nfn a() { 1 }\n</REPLACE>\n\
                    <SEARCH>\nold\n</SEARCH>\n<REPLACE>\nnew\n</REPLACE>";
        let blocks = parse_blocks(text);
        assert_eq!(
            blocks,
            vec![
                EditBlock::new("fn a() {}", "fn a() { 1 }"),
                EditBlock::new("old", "new"),
            ]
        );
    }

    #[test]
    fn empty_replacement_deletes() {
        let blocks = parse_blocks("<SEARCH>\ndebug!();\n</SEARCH>\n<REPLACE>\n</REPLACE>");
        assert_eq!(blocks, vec![EditBlock::new("debug!();", "")]);
    }

    #[test]
    fn no_blocks_means_no_changes() {
        assert!(parse_blocks("").is_empty());
        assert!(parse_blocks("[]").is_empty());
        assert!(parse_blocks("No changes are needed.").is_empty());
    }

    #[test]
    fn ignores_surrounding_prose_and_fences() {
        let text = "Here you go:\n```\n<SEARCH>x = 1</SEARCH><REPLACE>x = 2</REPLACE>\n```";
        assert_eq!(parse_blocks(text), vec![EditBlock::new("x = 1", "x = 2")]);
    }

    #[test]
    fn display_round_trips() {
        let block = EditBlock::new("a", "b");
        assert_eq!(parse_blocks(&block.to_string()), vec![block]);
    }
}
