//! Greedy, order-preserving packing of text blocks into size-bounded parts.
//!
//! Sizes are counted in chars (Unicode scalar values), never bytes, so a part
//! never exceeds its budget regardless of the script the content is written in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

pub const EMPTY_PACK_TEXT: &str = "No data available.";

/// A newline found before this char offset is ignored in favour of a hard cut,
/// so oversized blocks never shed a run of tiny pieces.
const MIN_NEWLINE_SPLIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackBlock {
    pub text: String,
    pub snippet_count: usize,
}

impl PackBlock {
    pub fn new(text: impl Into<String>, snippet_count: usize) -> Self {
        Self {
            text: text.into(),
            snippet_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPreset {
    Small,
    #[default]
    Medium,
    Large,
}

impl ChunkPreset {
    /// Maximum chars per part body.
    pub fn max_chars(self) -> usize {
        match self {
            ChunkPreset::Small => 12_000,
            ChunkPreset::Medium => 24_000,
            ChunkPreset::Large => 40_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkPreset::Small => "small",
            ChunkPreset::Medium => "medium",
            ChunkPreset::Large => "large",
        }
    }
}

impl FromStr for ChunkPreset {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(ChunkPreset::Small),
            "medium" => Ok(ChunkPreset::Medium),
            "large" => Ok(ChunkPreset::Large),
            other => Err(RequestError::invalid(
                "chunkPreset",
                format!("'{other}' (expected small, medium or large)"),
            )),
        }
    }
}

impl fmt::Display for ChunkPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char, or `s.len()` when `s` is shorter.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Split `content` into pieces of at most `max_chars` chars, preferring to cut
/// at the last newline inside the window.
pub fn split_for_chunk_limit(content: &str, max_chars: usize) -> Vec<String> {
    if char_len(content) <= max_chars {
        return vec![content.to_string()];
    }

    let mut pieces = Vec::new();
    let mut remaining = content;

    while !remaining.is_empty() {
        if char_len(remaining) <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }

        // The newline may sit exactly at `max_chars`, so the window is one char wider.
        let window = &remaining[..byte_offset(remaining, max_chars + 1)];
        let split_chars = match window.rfind('\n') {
            Some(pos) if char_len(&window[..pos]) >= MIN_NEWLINE_SPLIT => char_len(&window[..pos]),
            _ => max_chars,
        };

        let cut = byte_offset(remaining, split_chars);
        pieces.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start();
    }

    pieces
}

#[derive(Default)]
struct Accumulator {
    text: String,
    chars: usize,
    snippets: usize,
}

impl Accumulator {
    fn push(&mut self, piece: &str, piece_chars: usize) {
        self.text.push_str(piece);
        self.chars += piece_chars;
    }

    /// Emit the accumulated text as a part unless it is blank. A blank buffer is
    /// dropped but keeps its snippet count for the next part.
    fn flush(&mut self, parts: &mut Vec<PackBlock>) {
        let trimmed = self.text.trim();
        if !trimmed.is_empty() {
            parts.push(PackBlock::new(trimmed, self.snippets));
            self.snippets = 0;
        }
        self.text.clear();
        self.chars = 0;
    }
}

/// Pack `blocks` into parts whose trimmed text is at most `max_chars` chars.
///
/// A block's snippet count is attributed exactly once, to the part holding its
/// first piece. An empty input yields a single `No data available.` part.
pub fn chunk_blocks(blocks: &[PackBlock], max_chars: usize) -> Vec<PackBlock> {
    let mut parts: Vec<PackBlock> = Vec::new();
    let mut acc = Accumulator::default();

    for block in blocks {
        let candidate = format!("{}\n\n", block.text.trim());
        let mut counted = false;

        for piece in split_for_chunk_limit(&candidate, max_chars) {
            let normalized = format!("{}\n\n", piece.trim());
            let normalized_chars = char_len(&normalized);

            if normalized_chars > max_chars {
                // Unbroken run: emit fixed-size windows, each closing its own part.
                let mut rest = normalized.as_str();
                while !rest.is_empty() {
                    let cut = byte_offset(rest, max_chars);
                    let segment = &rest[..cut];
                    let segment_chars = char_len(segment);
                    if acc.chars + segment_chars > max_chars {
                        acc.flush(&mut parts);
                    }
                    acc.push(segment, segment_chars);
                    if block.snippet_count > 0 && !counted {
                        acc.snippets += block.snippet_count;
                        counted = true;
                    }
                    acc.flush(&mut parts);
                    rest = &rest[cut..];
                }
                continue;
            }

            if acc.chars + normalized_chars > max_chars {
                acc.flush(&mut parts);
            }
            acc.push(&normalized, normalized_chars);

            if block.snippet_count > 0 && !counted {
                acc.snippets += block.snippet_count;
                counted = true;
            }
        }
    }

    acc.flush(&mut parts);

    if parts.is_empty() {
        parts.push(PackBlock::new(EMPTY_PACK_TEXT, 0));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn lines(count: usize, width: usize) -> String {
        (0..count)
            .map(|i| format!("{:0>width$}", i, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_input_yields_sentinel() {
        let parts = chunk_blocks(&[], 12_000);
        assert_eq!(parts, vec![PackBlock::new(EMPTY_PACK_TEXT, 0)]);

        let parts = chunk_blocks(&[PackBlock::new("   \n ", 0)], 12_000);
        assert_eq!(parts, vec![PackBlock::new(EMPTY_PACK_TEXT, 0)]);
    }

    #[test]
    fn small_blocks_share_a_part() {
        let blocks = vec![
            PackBlock::new("## A\n", 0),
            PackBlock::new("### one\nbody", 1),
            PackBlock::new("### two\nbody", 1),
        ];
        let parts = chunk_blocks(&blocks, 12_000);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text, "## A\n\n### one\nbody\n\n### two\nbody");
        assert_eq!(parts[0].snippet_count, 2);
    }

    #[test]
    fn flushes_when_next_block_would_overflow() {
        let a = "a".repeat(600);
        let b = "b".repeat(600);
        let parts = chunk_blocks(&[PackBlock::new(a.clone(), 1), PackBlock::new(b.clone(), 1)], 1_000);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], PackBlock::new(a, 1));
        assert_eq!(parts[1], PackBlock::new(b, 1));
    }

    #[test]
    fn unbroken_text_is_windowed_and_preserved() {
        let content = "x".repeat(50_000);
        let parts = chunk_blocks(&[PackBlock::new(content.clone(), 1)], 12_000);

        assert!(parts.len() >= 5, "got {} parts", parts.len());
        for part in &parts {
            assert!(!part.text.trim().is_empty());
            assert!(char_len(&part.text) <= 12_000);
        }
        let rebuilt: String = parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(strip_ws(&rebuilt), content);
        assert_eq!(parts.iter().map(|p| p.snippet_count).sum::<usize>(), 1);
        assert_eq!(parts[0].snippet_count, 1);
    }

    #[test]
    fn multiline_text_splits_on_newlines() {
        let content = lines(2_000, 24);
        let parts = chunk_blocks(&[PackBlock::new(content.clone(), 1)], 12_000);

        assert!(parts.len() >= 4);
        for part in &parts {
            assert!(char_len(&part.text) <= 12_000);
            // Every part starts and ends on a whole line.
            for line in part.text.lines() {
                assert_eq!(line.len(), 24, "torn line {line:?}");
            }
        }
        let rebuilt = parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n");
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn early_newline_falls_back_to_hard_cut() {
        let content = format!("{}\n{}", "a".repeat(50), "b".repeat(2_000));
        let pieces = split_for_chunk_limit(&content, 1_000);
        assert_eq!(char_len(&pieces[0]), 1_000);
        assert_eq!(strip_ws(&pieces.concat()), strip_ws(&content));
    }

    #[test]
    fn newline_at_window_edge_is_used() {
        let content = format!("{}\n{}", "a".repeat(1_000), "b".repeat(500));
        let pieces = split_for_chunk_limit(&content, 1_000);
        assert_eq!(pieces, vec!["a".repeat(1_000), "b".repeat(500)]);
    }

    #[test]
    fn budget_counts_chars_not_bytes() {
        let content = "é".repeat(2_500);
        let parts = chunk_blocks(&[PackBlock::new(content.clone(), 0)], 1_000);
        assert_eq!(parts.len(), 3);
        for part in &parts {
            assert!(char_len(&part.text) <= 1_000);
        }
        assert_eq!(parts.concat_text(), content);
    }

    #[test]
    fn snippet_totals_match_block_totals() {
        let mut blocks = vec![PackBlock::new("## Key Text Snippets", 0)];
        for i in 0..40 {
            let body = lines(30 + i * 7, 40);
            blocks.push(PackBlock::new(format!("### f{i}.txt\n~~~text\n{body}\n~~~\n"), 1));
        }
        let parts = chunk_blocks(&blocks, 12_000);
        assert_eq!(parts.iter().map(|p| p.snippet_count).sum::<usize>(), 40);
        assert!(parts.iter().all(|p| char_len(&p.text) <= 12_000));
    }

    #[test]
    fn presets_and_parsing() {
        assert_eq!(ChunkPreset::Small.max_chars(), 12_000);
        assert_eq!(ChunkPreset::default().max_chars(), 24_000);
        assert_eq!("large".parse::<ChunkPreset>().unwrap(), ChunkPreset::Large);
        assert!("huge".parse::<ChunkPreset>().is_err());
    }

    trait ConcatText {
        fn concat_text(&self) -> String;
    }

    impl ConcatText for Vec<PackBlock> {
        fn concat_text(&self) -> String {
            self.iter().map(|p| p.text.as_str()).collect()
        }
    }
}
