use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::ScanConfig;
use crate::model::{HostInfo, PayloadData, RawEntry};
use crate::paths::{file_name, is_hidden};

fn exclude_overrides(root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);

    // For directories, exclude both the entry and its descendants,
    // otherwise the walker may still descend into it.
    for d in exclude_dir_names {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub exclude_dir_names: Vec<String>,
    /// Text files above this size are recorded without their content.
    pub max_content_bytes: u64,
    pub include_hidden: bool,
}

impl ScanOptions {
    pub fn from_config(root: &Path, cfg: &ScanConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            exclude_dir_names: cfg.exclude_dir_names.clone(),
            max_content_bytes: cfg.max_content_bytes,
            include_hidden: cfg.include_hidden,
        }
    }
}

struct WalkedEntry {
    abs_path: PathBuf,
    rel_path: String,
    is_dir: bool,
}

/// Walk `opts.root` and capture every directory and regular file below it.
///
/// `.gitignore` / `.ignore` rules apply. Symlinks are not followed and are skipped.
/// Entries that vanish or become unreadable mid-scan are dropped.
pub fn scan_directory(opts: &ScanOptions) -> Result<Vec<RawEntry>> {
    let meta = std::fs::metadata(&opts.root)
        .with_context(|| format!("Scan root does not exist: {}", opts.root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("Scan root is not a directory: {}", opts.root.display());
    }

    let overrides = exclude_overrides(&opts.root, &opts.exclude_dir_names)?;
    let walker = WalkBuilder::new(&opts.root)
        .standard_filters(true)
        .hidden(!opts.include_hidden)
        .require_git(false)
        .follow_links(false)
        .overrides(overrides)
        .build();

    let mut walked = Vec::new();
    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if dent.depth() == 0 {
            continue;
        }
        let Some(ft) = dent.file_type() else { continue };
        if !ft.is_dir() && !ft.is_file() {
            continue;
        }

        let abs_path = dent.into_path();
        let rel_path = relative_slash_path(&abs_path, &opts.root)?;
        walked.push(WalkedEntry {
            abs_path,
            rel_path,
            is_dir: ft.is_dir(),
        });
    }

    let mut entries: Vec<RawEntry> = walked
        .par_iter()
        .filter_map(|w| match capture_entry(w, opts.max_content_bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(path = %w.abs_path.display(), error = %e, "skipping entry");
                None
            }
        })
        .collect();

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Scan `opts.root` and wrap the entries in a payload for `host`.
pub fn build_payload(opts: &ScanOptions, host: HostInfo) -> Result<PayloadData> {
    let entries = scan_directory(opts)?;
    let root = std::fs::canonicalize(&opts.root).unwrap_or_else(|_| opts.root.clone());
    tracing::info!(root = %root.display(), entries = entries.len(), "scan complete");
    Ok(PayloadData::new(host, &root.to_string_lossy(), entries))
}

fn relative_slash_path(path: &Path, base: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", path.display(), base.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn capture_entry(w: &WalkedEntry, max_content_bytes: u64) -> std::io::Result<RawEntry> {
    let meta = std::fs::metadata(&w.abs_path)?;
    let mtime = meta
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    let mut entry = if w.is_dir {
        RawEntry::dir(&w.rel_path)
    } else {
        capture_file(&w.abs_path, &w.rel_path, meta.len(), max_content_bytes)?
    };
    entry.name = file_name(&w.rel_path).to_string();
    entry.mtime = mtime;
    entry.is_hidden = Some(is_hidden(&w.rel_path));
    Ok(entry)
}

/// Hash the whole file; keep its body only when it is text and fits the limit.
fn capture_file(abs_path: &Path, rel_path: &str, size: u64, max_content_bytes: u64) -> std::io::Result<RawEntry> {
    let mut file = File::open(abs_path)?;
    let mut head = Vec::new();
    file.by_ref()
        .take(max_content_bytes.saturating_add(1))
        .read_to_end(&mut head)?;

    let mut hasher = Sha256::new();
    hasher.update(&head);
    std::io::copy(&mut file, &mut hasher)?;
    let sha256 = format!("{:x}", hasher.finalize());

    let fits = head.len() as u64 <= max_content_bytes;
    if !fits {
        head.truncate(max_content_bytes as usize);
    }

    let mut entry = RawEntry::binary_file(rel_path, size);
    if looks_like_text(&head, !fits) {
        entry.content_type = Some("text".to_string());
        entry.content = if fits { String::from_utf8(head).ok() } else { None };
    }
    entry.sha256 = Some(sha256);
    Ok(entry)
}

/// UTF-8 without NUL bytes. A sample cut off mid-file may end inside a
/// multi-byte sequence.
fn looks_like_text(sample: &[u8], cut: bool) -> bool {
    if sample.contains(&0) {
        return false;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => cut && e.error_len().is_none(),
    }
}
