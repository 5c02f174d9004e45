use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{char_len, chunk_blocks, ChunkPreset, PackBlock};
use crate::config::PackConfig;
use crate::error::{RequestError, Result};
use crate::model::{FileNode, Host, NodeType};
use crate::paths::depth;
use crate::scorer::rank_by_path;
use crate::snippet::{escape_fence, render_snippet, SnippetMode};
use crate::store::NodeStore;

pub const PACK_TITLE: &str = "# LanMap Context Pack";

/// Files listed under `## Priority Paths`.
const PRIORITY_PATH_LIMIT: usize = 60;
/// Indent levels rendered in the directory tree; deeper entries stay at this level.
const MAX_TREE_INDENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPackRequest {
    pub host_id: String,
    #[serde(default)]
    pub snippet_mode: Option<SnippetMode>,
    #[serde(default)]
    pub chunk_preset: Option<ChunkPreset>,
}

impl ContextPackRequest {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            snippet_mode: None,
            chunk_preset: None,
        }
    }

    /// Build a request from loosely typed inputs (CLI flags, tool arguments).
    pub fn parse(host_id: &str, snippet_mode: Option<&str>, chunk_preset: Option<&str>) -> std::result::Result<Self, RequestError> {
        let host_id = host_id.trim();
        if host_id.is_empty() {
            return Err(RequestError::invalid("hostId", "is required"));
        }
        Ok(Self {
            host_id: host_id.to_string(),
            snippet_mode: snippet_mode.map(str::parse::<SnippetMode>).transpose()?,
            chunk_preset: chunk_preset.map(str::parse::<ChunkPreset>).transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartStats {
    pub files: usize,
    pub snippet_count: usize,
    pub chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPackPart {
    pub index: usize,
    pub total: usize,
    pub content: String,
    pub stats: PartStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSummary {
    pub host_id: String,
    pub generated_at: String,
    pub truncated_file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPackResponse {
    pub parts: Vec<ContextPackPart>,
    pub summary: PackSummary,
}

/// Human-readable size: `N B`, `x.y KB`, `x.y MB`; `-` when unknown.
pub fn format_bytes(value: Option<u64>) -> String {
    let Some(bytes) = value else {
        return "-".to_string();
    };
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        return format!("{kb:.1} KB");
    }
    format!("{:.1} MB", kb / 1024.0)
}

fn format_date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string())
}

fn summary_block(nodes: &[FileNode], files: &[&FileNode], text_files: &[&FileNode]) -> PackBlock {
    let dirs = nodes.iter().filter(|n| n.is_dir()).count();
    let binary = files
        .iter()
        .filter(|n| n.content_type == crate::model::ContentType::Binary)
        .count();
    let hidden = nodes.iter().filter(|n| n.is_hidden).count();

    let text = [
        "## Host Summary".to_string(),
        format!("- Total entries: {}", nodes.len()),
        format!("- Directories: {dirs}"),
        format!("- Files: {}", files.len()),
        format!("- Text files: {}", text_files.len()),
        format!("- Binary files: {binary}"),
        format!("- Hidden entries: {hidden}"),
        String::new(),
    ]
    .join("\n");
    PackBlock::new(text, 0)
}

fn priority_block(files: &[&FileNode]) -> PackBlock {
    let mut ranked = files.to_vec();
    rank_by_path(&mut ranked, |n| n.path.as_str());

    let mut lines = vec!["## Priority Paths".to_string()];
    lines.extend(
        ranked
            .iter()
            .take(PRIORITY_PATH_LIMIT)
            .map(|n| format!("- `{}` ({})", n.path, n.content_type)),
    );
    lines.push(String::new());
    PackBlock::new(lines.join("\n"), 0)
}

fn tree_block(nodes: &[FileNode]) -> PackBlock {
    let mut lines = vec!["## Directory Tree".to_string(), "~~~text".to_string()];
    lines.extend(nodes.iter().map(|n| {
        let indent = "  ".repeat(depth(&n.path).min(MAX_TREE_INDENT));
        let marker = if n.is_dir() { "[D]" } else { "[F]" };
        format!("{indent}- {marker} {}", n.name)
    }));
    lines.push("~~~".to_string());
    lines.push(String::new());
    PackBlock::new(lines.join("\n"), 0)
}

fn inventory_block(nodes: &[FileNode]) -> PackBlock {
    let mut lines = vec!["## File Inventory".to_string()];
    lines.extend(nodes.iter().map(|n| {
        format!(
            "- `{}` | {} | {} | {} | {}",
            n.path,
            n.node_type,
            format_bytes(n.size),
            format_date(n.mtime),
            n.content_type
        )
    }));
    lines.push(String::new());
    PackBlock::new(lines.join("\n"), 0)
}

/// Heading block followed by one block per text file in priority order.
/// Returns the blocks and how many snippets were truncated.
fn snippet_blocks(text_files: &[&FileNode], mode: SnippetMode) -> (Vec<PackBlock>, usize) {
    let mut ranked = text_files.to_vec();
    rank_by_path(&mut ranked, |n| n.path.as_str());

    let mut truncated = 0;
    let mut blocks = Vec::with_capacity(ranked.len() + 1);
    blocks.push(PackBlock::new("## Key Text Snippets", 0));

    for node in ranked {
        let snippet = render_snippet(node.content.as_deref().unwrap_or_default(), mode);
        if snippet.truncated {
            truncated += 1;
        }
        let text = format!("### {}\n~~~text\n{}\n~~~\n", node.path, escape_fence(&snippet.text));
        blocks.push(PackBlock::new(text, 1));
    }
    (blocks, truncated)
}

fn build_header(host: &Host, generated_at: &str, index: usize, total: usize, mode: SnippetMode, preset: ChunkPreset) -> String {
    [
        PACK_TITLE.to_string(),
        String::new(),
        format!("Host: {} ({})", host.label, host.address),
        format!("Generated: {generated_at}"),
        format!("Part: {index}/{total}"),
        format!("Snippet mode: {mode}"),
        format!("Chunk preset: {preset}"),
        String::new(),
    ]
    .join("\n")
}

/// Render the ordered pack for `host` from its nodes (sorted by path).
pub fn assemble_pack(host: &Host, nodes: &[FileNode], mode: SnippetMode, preset: ChunkPreset) -> ContextPackResponse {
    let files: Vec<&FileNode> = nodes.iter().filter(|n| n.node_type == NodeType::File).collect();
    let text_files: Vec<&FileNode> = files.iter().copied().filter(|n| n.is_text()).collect();
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    // A host without nodes renders as the single placeholder part.
    let (blocks, truncated_file_count) = if nodes.is_empty() {
        (Vec::new(), 0)
    } else {
        let (snippets, truncated) = snippet_blocks(&text_files, mode);
        let mut blocks = vec![
            summary_block(nodes, &files, &text_files),
            priority_block(&files),
            tree_block(nodes),
            inventory_block(nodes),
        ];
        blocks.extend(snippets);
        (blocks, truncated)
    };

    let chunks = chunk_blocks(&blocks, preset.max_chars());
    let total = chunks.len();
    let parts: Vec<ContextPackPart> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = build_header(host, &generated_at, i + 1, total, mode, preset);
            let content = format!("{header}{}\n", chunk.text.trim_end());
            ContextPackPart {
                index: i + 1,
                total,
                stats: PartStats {
                    files: files.len(),
                    snippet_count: chunk.snippet_count,
                    chars: char_len(&content),
                },
                content,
            }
        })
        .collect();

    ContextPackResponse {
        parts,
        summary: PackSummary {
            host_id: host.id.clone(),
            generated_at,
            truncated_file_count,
        },
    }
}

/// Resolve defaults, load the host snapshot and assemble its pack.
pub fn generate_context_pack(
    store: &dyn NodeStore,
    request: &ContextPackRequest,
    defaults: &PackConfig,
) -> Result<ContextPackResponse> {
    let mode = request.snippet_mode.unwrap_or(defaults.snippet_mode);
    let preset = request.chunk_preset.unwrap_or(defaults.chunk_preset);

    let host = store
        .get_host(&request.host_id)?
        .ok_or_else(|| RequestError::NotFound("Host".into()))?;
    let nodes = store.list_nodes(&host.id)?;

    let response = assemble_pack(&host, &nodes, mode, preset);
    tracing::debug!(
        host_id = %host.id,
        nodes = nodes.len(),
        parts = response.parts.len(),
        truncated = response.summary.truncated_file_count,
        %mode,
        %preset,
        "context pack generated"
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;
    use crate::paths::file_name;

    fn host() -> Host {
        let now = Utc::now();
        Host {
            id: "h1".into(),
            label: "nas".into(),
            address: "10.0.0.5".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn dir(path: &str) -> FileNode {
        FileNode {
            id: format!("id:{path}"),
            host_id: "h1".into(),
            path: path.into(),
            name: file_name(path).into(),
            node_type: NodeType::Dir,
            size: None,
            mtime: None,
            is_hidden: crate::paths::is_hidden(path),
            content_type: ContentType::None,
            content: None,
            sha256: None,
        }
    }

    fn text(path: &str, body: &str) -> FileNode {
        FileNode {
            node_type: NodeType::File,
            size: Some(body.len() as u64),
            content_type: ContentType::Text,
            content: Some(body.into()),
            ..dir(path)
        }
    }

    fn binary(path: &str, size: u64) -> FileNode {
        FileNode {
            node_type: NodeType::File,
            size: Some(size),
            content_type: ContentType::Binary,
            ..dir(path)
        }
    }

    #[test]
    fn empty_host_yields_sentinel_part() {
        let pack = assemble_pack(&host(), &[], SnippetMode::Compact, ChunkPreset::Medium);
        assert_eq!(pack.parts.len(), 1);

        let part = &pack.parts[0];
        assert!(part.content.starts_with("# LanMap Context Pack\n\nHost: nas (10.0.0.5)\n"));
        assert!(part.content.ends_with("Chunk preset: medium\nNo data available.\n"));
        assert_eq!((part.index, part.total, part.stats.files, part.stats.snippet_count), (1, 1, 0, 0));
        assert_eq!(pack.summary.truncated_file_count, 0);
    }

    #[test]
    fn header_and_sections_in_order() {
        let nodes = vec![dir("etc"), binary("etc/blob.bin", 2048), text("etc/hosts", "127.0.0.1 localhost")];
        let pack = assemble_pack(&host(), &nodes, SnippetMode::Compact, ChunkPreset::Small);
        let content = &pack.parts[0].content;

        assert!(content.contains("Part: 1/1\nSnippet mode: compact\nChunk preset: small\n## Host Summary"));
        let order = ["## Host Summary", "## Priority Paths", "## Directory Tree", "## File Inventory", "## Key Text Snippets", "### etc/hosts"];
        let positions: Vec<usize> = order.iter().map(|h| content.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");

        assert!(content.contains("- [D] etc\n  - [F] blob.bin\n  - [F] hosts"));
        assert!(content.contains("- `etc/blob.bin` | file | 2.0 KB | - | binary"));
        assert!(content.contains("- `etc` | dir | - | - | none"));
        assert!(content.ends_with("~~~\n"));
        assert_eq!(pack.parts[0].stats.files, 2);
        assert_eq!(pack.parts[0].stats.snippet_count, 1);
        assert_eq!(pack.parts[0].stats.chars, content.chars().count());
    }

    #[test]
    fn secrets_rank_above_readme() {
        let nodes = vec![text("readme.md", "hello"), text("secret.key", "hunter2")];
        let pack = assemble_pack(&host(), &nodes, SnippetMode::Compact, ChunkPreset::Medium);
        let content = &pack.parts[0].content;
        assert!(content.find("### secret.key").unwrap() < content.find("### readme.md").unwrap());
        assert!(content.find("- `secret.key` (text)").unwrap() < content.find("- `readme.md` (text)").unwrap());
    }

    #[test]
    fn large_file_spreads_over_small_parts() {
        let body = "x".repeat(50_000);
        let nodes = vec![text("big.txt", &body)];
        let pack = assemble_pack(&host(), &nodes, SnippetMode::Full, ChunkPreset::Small);

        assert!(pack.parts.len() >= 5);
        for (i, part) in pack.parts.iter().enumerate() {
            assert_eq!(part.index, i + 1);
            assert_eq!(part.total, pack.parts.len());
            assert!(part.content.contains(&format!("Part: {}/{}", i + 1, pack.parts.len())));
        }
        let snippets: usize = pack.parts.iter().map(|p| p.stats.snippet_count).sum();
        assert_eq!(snippets, 1);
        assert_eq!(pack.summary.truncated_file_count, 0);
    }

    #[test]
    fn compact_mode_counts_truncations_and_escapes_fences() {
        let nodes = vec![text("a.txt", &"y".repeat(701)), text("b.txt", "~~~\nbreakout\n~~~")];
        let pack = assemble_pack(&host(), &nodes, SnippetMode::Compact, ChunkPreset::Large);
        assert_eq!(pack.summary.truncated_file_count, 1);

        let content = &pack.parts[0].content;
        assert!(content.contains("...[compact snippet truncated]"));
        assert!(content.contains("### b.txt\n~~~text\n~ ~ ~\nbreakout\n~ ~ ~\n~~~"));
    }

    #[test]
    fn snippet_counts_sum_to_text_files() {
        let mut nodes: Vec<FileNode> = (0..120)
            .map(|i| text(&format!("notes/n{i:03}.txt"), &"line of notes\n".repeat(40)))
            .collect();
        nodes.push(binary("notes/x.bin", 10));
        nodes.sort_by(|a, b| a.path.cmp(&b.path));

        let pack = assemble_pack(&host(), &nodes, SnippetMode::Full, ChunkPreset::Small);
        assert!(pack.parts.len() > 1);
        let snippets: usize = pack.parts.iter().map(|p| p.stats.snippet_count).sum();
        assert_eq!(snippets, 120);
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(ContextPackRequest::parse("h1", Some("full"), Some("large")).is_ok());
        assert_eq!(
            ContextPackRequest::parse("h1", Some("verbose"), None).unwrap_err().kind(),
            "request.invalid_parameter"
        );
        assert!(ContextPackRequest::parse(" ", None, None).is_err());
    }

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(None), "-");
        assert_eq!(format_bytes(Some(512)), "512 B");
        assert_eq!(format_bytes(Some(1536)), "1.5 KB");
        assert_eq!(format_bytes(Some(5 * 1024 * 1024)), "5.0 MB");
    }
}
