//! Import service: decode a payload and commit it as the host's new snapshot,
//! plus the read-side lookups (tree, file content, host listing).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::PayloadLimits;
use crate::error::{RequestError, Result};
use crate::model::{ContentType, FileContent, Host, HostSummary, ImportRun, NodeType, TreeNode};
use crate::payload::decode_payload;
use crate::store::NodeStore;
use crate::tree::build_tree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub host_id: String,
    pub imported_count: usize,
    pub skipped_count: usize,
    pub warnings: Vec<String>,
}

/// Parent directory of a scan root, posix `dirname` style (`"a"` -> `"."`, `"/a"` -> `"/"`).
/// Backslashes count as separators so Windows roots resolve too.
pub fn dirname(path: &str) -> String {
    let is_sep = |c: char| c == '/' || c == '\\';
    let trimmed = path.trim_end_matches(is_sep);
    if trimmed.is_empty() {
        return if path.is_empty() { ".".into() } else { path[..1].to_string() };
    }
    match trimmed.rfind(is_sep) {
        None => ".".into(),
        Some(idx) => {
            let head = trimmed[..idx].trim_end_matches(is_sep);
            if head.is_empty() {
                trimmed[..1].to_string()
            } else {
                head.to_string()
            }
        }
    }
}

/// Decode, validate and commit `payload` as a full replacement of the host's nodes.
///
/// Nothing is written unless the whole payload validates.
pub fn import_payload(store: &dyn NodeStore, payload: &str, limits: &PayloadLimits) -> Result<ImportResult> {
    let decoded = decode_payload(payload, limits)?;
    let data = decoded.data;

    let run_path = data.run_path.clone().unwrap_or_else(|| data.root_path.clone());
    let run_parent_path = data
        .run_parent_path
        .clone()
        .unwrap_or_else(|| dirname(&run_path));

    let mut warnings = Vec::new();
    for entry in &data.entries {
        if entry.node_type != NodeType::File {
            continue;
        }
        match (entry.content_type, entry.content.is_some()) {
            (ContentType::Text, false) => {
                warnings.push(format!("Text file has no content: {}", entry.path));
            }
            (ContentType::Binary | ContentType::None, true) => {
                warnings.push(format!("Content of non-text file was ignored: {}", entry.path));
            }
            _ => {}
        }
    }

    let entry_count = data.entries.len();

    // The store fills in the host id when it commits.
    let run = ImportRun {
        host_id: String::new(),
        version: data.version,
        generated_at: data.generated_at,
        imported_at: Utc::now(),
        root_path: data.root_path,
        run_path,
        run_parent_path,
        entry_count,
        payload_size: decoded.raw_byte_size,
        warnings: warnings.clone(),
    };

    let (host, imported_count) =
        store.import_snapshot(&data.host.label, &data.host.address, data.entries, run)?;

    tracing::info!(
        host_id = %host.id,
        address = %host.address,
        compression = %decoded.compression,
        entries = imported_count,
        warnings = warnings.len(),
        "import committed"
    );

    Ok(ImportResult {
        host_id: host.id,
        imported_count,
        skipped_count: 0,
        warnings,
    })
}

/// Register a host explicitly. Label and address are trimmed and must be non-empty.
pub fn add_host(store: &dyn NodeStore, label: &str, address: &str) -> Result<Host> {
    let label = label.trim();
    let address = address.trim();
    if label.is_empty() {
        return Err(RequestError::invalid("label", "must not be empty").into());
    }
    if address.is_empty() {
        return Err(RequestError::invalid("address", "must not be empty").into());
    }
    Ok(store.create_host(label, address)?)
}

pub fn list_hosts(store: &dyn NodeStore) -> Result<Vec<HostSummary>> {
    Ok(store.list_hosts()?)
}

/// Rebuild the host's tree from its stored nodes.
pub fn host_tree(store: &dyn NodeStore, host_id: &str) -> Result<Vec<TreeNode>> {
    if store.get_host(host_id)?.is_none() {
        return Err(RequestError::NotFound("Host".into()).into());
    }
    let nodes = store.list_nodes(host_id)?;
    Ok(build_tree(&nodes))
}

pub fn get_file_content(store: &dyn NodeStore, node_id: &str) -> Result<FileContent> {
    let node = store
        .get_node(node_id)?
        .ok_or_else(|| RequestError::NotFound("File".into()))?;
    if node.is_dir() {
        return Err(RequestError::invalid("id", format!("{} is a directory", node.path)).into());
    }
    Ok(FileContent {
        id: node.id,
        path: node.path,
        name: node.name,
        size: node.size,
        mtime: node.mtime,
        content_type: node.content_type,
        content: node.content,
        sha256: node.sha256,
    })
}
