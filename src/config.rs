use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunker::ChunkPreset;
use crate::snippet::SnippetMode;

/// Name of the per-directory config file picked up when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = ".lanmap.json";

/// Ceilings applied while decoding an untrusted payload.
///
/// Every limit is checked before the corresponding work is done, so a hostile
/// payload costs at most `max_encoded_bytes` of input plus `max_decoded_bytes`
/// of inflated output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadLimits {
    /// Upper bound on the wire string itself.
    pub max_encoded_bytes: usize,
    /// Decompression ceiling (decompression-bomb guard).
    pub max_decoded_bytes: usize,
    pub max_entries: usize,
    /// Maximum number of `/` separators in an entry path.
    pub max_path_depth: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_encoded_bytes: 32 * 1024 * 1024,
            max_decoded_bytes: 64 * 1024 * 1024,
            max_entries: 200_000,
            max_path_depth: 256,
        }
    }
}

/// Defaults used when a pack request leaves mode / preset unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub snippet_mode: SnippetMode,
    pub chunk_preset: ChunkPreset,
}

/// Controls the local directory scanner (`lanmap scan`).
///
/// `.gitignore` / `.ignore` files are always respected; these are additional knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (compared against path components).
    pub exclude_dir_names: Vec<String>,
    /// Text files larger than this are recorded without content.
    pub max_content_bytes: u64,
    pub include_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![".git".into(), "node_modules".into(), "target".into()],
            max_content_bytes: 256 * 1024,
            include_hidden: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON snapshot backing the node store.
    pub store_path: PathBuf,
    pub payload: PayloadLimits,
    pub pack: PackConfig,
    pub scan: ScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            payload: PayloadLimits::default(),
            pack: PackConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".lanmap"))
        .unwrap_or_else(|| PathBuf::from(".lanmap"))
        .join("store.json")
}

/// Load the config.
///
/// With an explicit path, the file must exist and parse. Otherwise
/// `.lanmap.json` in `dir` is used when present, falling back to defaults.
/// `LANMAP_STORE` overrides `store_path` in both cases.
pub fn load_config(dir: &Path, explicit: Option<&Path>) -> Result<Config> {
    let mut cfg = match explicit {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str::<Config>(&text)
                .with_context(|| format!("Invalid config: {}", path.display()))?
        }
        None => {
            let primary = dir.join(CONFIG_FILE_NAME);
            match std::fs::read_to_string(&primary) {
                Ok(text) => serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
                    tracing::warn!(path = %primary.display(), error = %e, "ignoring malformed config");
                    Config::default()
                }),
                Err(_) => Config::default(),
            }
        }
    };

    if let Some(store) = std::env::var_os("LANMAP_STORE").filter(|v| !v.is_empty()) {
        cfg.store_path = PathBuf::from(store);
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{ "payload": { "max_decoded_bytes": 1024 }, "pack": { "chunk_preset": "small" } }"#,
        )
        .unwrap();

        let cfg = load_config(tmp.path(), Some(&path)).unwrap();
        assert_eq!(cfg.payload.max_decoded_bytes, 1024);
        assert_eq!(cfg.payload.max_entries, PayloadLimits::default().max_entries);
        assert_eq!(cfg.pack.chunk_preset, ChunkPreset::Small);
        assert_eq!(cfg.pack.snippet_mode, SnippetMode::Compact);
    }

    #[test]
    fn explicit_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(tmp.path(), Some(&path)).is_err());
    }
}
