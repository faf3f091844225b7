//! Small string and path helpers shared across modules.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static BASE64_RUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:data:[\w/+.-]+;base64,)?[A-Za-z0-9+/]{200,}={0,2}")
        .expect("base64 pattern is valid")
});

/// Prefix of `s` holding at most `max_chars` characters, cut on a char
/// boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Like [`truncate_chars`], appending `...` when anything was cut.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let head = truncate_chars(s, max_chars);
    if head.len() == s.len() {
        s.to_string()
    } else {
        format!("{head}...")
    }
}

/// Expand `~` and environment variables. Unknown variables are left as
/// written.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Replace long base64 payloads with a short placeholder for display.
pub fn elide_base64(text: &str) -> String {
    BASE64_RUN_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("[base64 data: {} chars]", caps[0].len())
        })
        .into_owned()
}
