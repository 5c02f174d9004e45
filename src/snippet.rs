use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

pub const COMPACT_SNIPPET_LIMIT: usize = 700;
pub const TRUNCATION_MARKER: &str = "...[compact snippet truncated]";

const FENCE: &str = "~~~";
const ESCAPED_FENCE: &str = "~ ~ ~";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetMode {
    #[default]
    Compact,
    Full,
}

impl SnippetMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SnippetMode::Compact => "compact",
            SnippetMode::Full => "full",
        }
    }
}

impl FromStr for SnippetMode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(SnippetMode::Compact),
            "full" => Ok(SnippetMode::Full),
            other => Err(RequestError::invalid(
                "snippetMode",
                format!("'{other}' (expected compact or full)"),
            )),
        }
    }
}

impl fmt::Display for SnippetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub truncated: bool,
}

/// Strip carriage returns and NUL bytes.
pub fn normalize_text(input: &str) -> String {
    input.chars().filter(|&c| c != '\r' && c != '\0').collect()
}

pub fn render_snippet(input: &str, mode: SnippetMode) -> Snippet {
    let normalized = normalize_text(input);
    if mode == SnippetMode::Full {
        return Snippet {
            text: normalized,
            truncated: false,
        };
    }

    match normalized.char_indices().nth(COMPACT_SNIPPET_LIMIT) {
        None => Snippet {
            text: normalized,
            truncated: false,
        },
        Some((cut, _)) => Snippet {
            text: format!("{}\n{TRUNCATION_MARKER}", &normalized[..cut]),
            truncated: true,
        },
    }
}

/// Break up any `~~~` run so content cannot close the enclosing fence.
pub fn escape_fence(input: &str) -> String {
    let mut out = input.replace(FENCE, ESCAPED_FENCE);
    // Long tilde runs can re-form a fence at the seam of a replacement.
    while out.contains(FENCE) {
        out = out.replace(FENCE, ESCAPED_FENCE);
    }
    out
}
