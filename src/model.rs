use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Dir,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Dir => "dir",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Binary,
    None,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Binary => "binary",
            ContentType::None => "none",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(ContentType::Text),
            "binary" => Some(ContentType::Binary),
            "none" => Some(ContentType::None),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression tag carried in the second segment of the wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    #[serde(rename = "gzip-base64")]
    Gzip,
    #[serde(rename = "deflate-base64")]
    Deflate,
}

impl Compression {
    pub fn tag(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip-base64",
            Compression::Deflate => "deflate-base64",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip-base64" | "gzip" => Ok(Compression::Gzip),
            "deflate-base64" | "deflate" => Ok(Compression::Deflate),
            other => Err(format!("unknown compression '{other}' (expected gzip or deflate)")),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub label: String,
    pub address: String,
}

/// Entry as written by a scanner; every optional field may be missing on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl RawEntry {
    pub fn dir(path: &str) -> Self {
        Self {
            path: path.to_string(),
            name: crate::paths::file_name(path).to_string(),
            node_type: "dir".to_string(),
            ..Self::default()
        }
    }

    pub fn text_file(path: &str, content: &str) -> Self {
        Self {
            path: path.to_string(),
            name: crate::paths::file_name(path).to_string(),
            node_type: "file".to_string(),
            size: Some(content.len() as u64),
            content_type: Some("text".to_string()),
            content: Some(content.to_string()),
            ..Self::default()
        }
    }

    pub fn binary_file(path: &str, size: u64) -> Self {
        Self {
            path: path.to_string(),
            name: crate::paths::file_name(path).to_string(),
            node_type: "file".to_string(),
            size: Some(size),
            content_type: Some("binary".to_string()),
            ..Self::default()
        }
    }
}

/// Payload body prior to encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadData {
    pub version: String,
    pub generated_at: String,
    pub root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_parent_path: Option<String>,
    pub host: HostInfo,
    pub entries: Vec<RawEntry>,
}

impl PayloadData {
    pub fn new(host: HostInfo, root_path: &str, entries: Vec<RawEntry>) -> Self {
        Self {
            version: "1".to_string(),
            generated_at: Utc::now().to_rfc3339(),
            root_path: root_path.to_string(),
            run_path: None,
            run_parent_path: None,
            host,
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub content_type: ContentType,
    pub content: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayloadData {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub root_path: String,
    pub run_path: Option<String>,
    pub run_parent_path: Option<String>,
    pub host: HostInfo,
    pub entries: Vec<ValidatedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPayload {
    pub compression: Compression,
    pub raw_byte_size: usize,
    pub data: ImportPayloadData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    pub label: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub host_id: String,
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub content_type: ContentType,
    pub content: Option<String>,
    pub sha256: Option<String>,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Dir
    }

    pub fn is_text(&self) -> bool {
        self.node_type == NodeType::File
            && self.content_type == ContentType::Text
            && self.content.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub host_id: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub root_path: String,
    pub run_path: String,
    pub run_parent_path: String,
    pub entry_count: usize,
    pub payload_size: usize,
    pub warnings: Vec<String>,
}

/// Host listing row joined with its latest import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub id: String,
    pub label: String,
    pub address: String,
    pub updated_at: DateTime<Utc>,
    pub file_count: usize,
    pub root_path: Option<String>,
    pub run_path: Option<String>,
    pub run_parent_path: Option<String>,
    pub imported_at: Option<DateTime<Utc>>,
}

/// Single file lookup view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub id: String,
    pub path: String,
    pub name: String,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    pub content_type: ContentType,
    pub content: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub children: Vec<TreeNode>,
}
