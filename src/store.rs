use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::StoreError;
use crate::model::{
    ContentType, FileNode, Host, HostSummary, ImportRun, NodeType, ValidatedEntry,
};

// ---------------------------------------------------------------------------
// Snapshot store. No external database required.
//
// Storage layout:  <store_path>        (single JSON document)
//   { "hosts":   { "<host_id>": Host },
//     "nodes":   { "<host_id>": [FileNode, ...] }      sorted by path
//     "imports": { "<host_id>": [ImportRun, ...] } }   oldest first, capped
//                  <store_path>.lock   (advisory lock shared by all processes)
//
// Every write holds the in-process write lock plus an exclusive file lock,
// reloads the file, applies the change and persists via temp file + rename.
// Readers reload whenever the file changed underneath them, so a CLI import
// shows up in a running `lanmap mcp` and neither overwrites the other.
// ---------------------------------------------------------------------------

/// Import records kept per host; older runs are dropped on the next import.
const IMPORT_HISTORY_LIMIT: usize = 20;

/// Backend contract used by the import, tree and pack services.
pub trait NodeStore: Send + Sync {
    /// Find a host by address (updating its label) or create it.
    fn upsert_host(&self, label: &str, address: &str) -> Result<Host, StoreError>;

    /// Register a new host; fails with `Conflict` when the address is taken.
    fn create_host(&self, label: &str, address: &str) -> Result<Host, StoreError>;

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError>;

    /// Hosts ordered by most recent update, with node counts and latest import paths.
    fn list_hosts(&self) -> Result<Vec<HostSummary>, StoreError>;

    /// Atomically swap the host's whole node set and record the import.
    /// Returns the number of nodes written.
    fn replace_host_nodes(
        &self,
        host_id: &str,
        entries: Vec<ValidatedEntry>,
        run: ImportRun,
    ) -> Result<usize, StoreError>;

    /// Upsert the host by address and swap its node set in one commit.
    /// `run.host_id` is filled in with the resolved host.
    fn import_snapshot(
        &self,
        label: &str,
        address: &str,
        entries: Vec<ValidatedEntry>,
        run: ImportRun,
    ) -> Result<(Host, usize), StoreError>;

    /// All nodes of a host ordered by path.
    fn list_nodes(&self, host_id: &str) -> Result<Vec<FileNode>, StoreError>;

    fn get_node(&self, node_id: &str) -> Result<Option<FileNode>, StoreError>;

    fn latest_import(&self, host_id: &str) -> Result<Option<ImportRun>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    hosts: BTreeMap<String, Host>,
    nodes: HashMap<String, Vec<FileNode>>,
    imports: HashMap<String, Vec<ImportRun>>,
}

impl Snapshot {
    fn load(path: &Path) -> Result<Self, StoreError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let bytes = serde_json::to_vec(self)?;

        let tmp = sibling(path, ".tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn host_by_address(&self, address: &str) -> Option<&Host> {
        self.hosts.values().find(|h| h.address == address)
    }

    fn fresh_host_id(&self, address: &str) -> String {
        let base = xxh3_64(address.as_bytes());
        let mut salt: u64 = 0;
        loop {
            let id = format!("h{:016x}", base.wrapping_add(salt));
            if !self.hosts.contains_key(&id) {
                return id;
            }
            salt += 1;
        }
    }

    fn insert_host(&mut self, label: &str, address: &str) -> Host {
        let now = Utc::now();
        let host = Host {
            id: self.fresh_host_id(address),
            label: label.to_string(),
            address: address.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.hosts.insert(host.id.clone(), host.clone());
        host
    }

    fn upsert_host(&mut self, label: &str, address: &str) -> Host {
        let Some(id) = self.host_by_address(address).map(|h| h.id.clone()) else {
            return self.insert_host(label, address);
        };
        match self.hosts.get_mut(&id) {
            Some(host) => {
                if host.label != label {
                    host.label = label.to_string();
                    host.updated_at = Utc::now();
                }
                host.clone()
            }
            None => self.insert_host(label, address),
        }
    }

    /// Install `nodes` as the host's whole set and append `run` to its history.
    /// The host must exist.
    fn swap_nodes(&mut self, host_id: &str, mut nodes: Vec<FileNode>, mut run: ImportRun) -> usize {
        for node in &mut nodes {
            node.id = node_id(host_id, &node.path);
            node.host_id = host_id.to_string();
        }
        let written = nodes.len();
        self.nodes.insert(host_id.to_string(), nodes);

        run.host_id = host_id.to_string();
        let runs = self.imports.entry(host_id.to_string()).or_default();
        runs.push(run);
        if runs.len() > IMPORT_HISTORY_LIMIT {
            let excess = runs.len() - IMPORT_HISTORY_LIMIT;
            runs.drain(..excess);
        }

        if let Some(host) = self.hosts.get_mut(host_id) {
            host.updated_at = Utc::now();
        }
        written
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn node_id(host_id: &str, path: &str) -> String {
    let key = format!("{host_id}\0{path}");
    format!("n{:016x}", xxh3_64(key.as_bytes()))
}

/// Stored form of the validated entries, sorted by path. Ids are assigned once
/// the owning host is known.
fn prepare_nodes(entries: Vec<ValidatedEntry>) -> Vec<FileNode> {
    let mut nodes: Vec<FileNode> = entries.into_iter().map(to_file_node).collect();
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    nodes
}

fn to_file_node(entry: ValidatedEntry) -> FileNode {
    // Only text files keep their body; directories never do.
    let keep_content = entry.node_type == NodeType::File && entry.content_type == ContentType::Text;
    FileNode {
        id: String::new(),
        host_id: String::new(),
        path: entry.path,
        name: entry.name,
        node_type: entry.node_type,
        size: entry.size,
        mtime: entry.mtime,
        is_hidden: entry.is_hidden,
        content_type: entry.content_type,
        content: if keep_content { entry.content } else { None },
        sha256: entry.sha256,
    }
}

/// Advisory lock on `<store_path>.lock`, released on drop.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(store_path: &Path, exclusive: bool) -> Result<Self, StoreError> {
        let path = sibling(store_path, ".lock");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// What the file looked like when it was last loaded or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn file_stamp(path: &Path) -> Result<Option<FileStamp>, StoreError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default)]
struct Loaded {
    snapshot: Snapshot,
    stamp: Option<FileStamp>,
    /// False when `snapshot` may not match the file and must be reloaded.
    synced: bool,
}

impl Loaded {
    fn reload(&mut self, path: &Path) -> Result<(), StoreError> {
        self.synced = false;
        self.snapshot = Snapshot::load(path)?;
        self.stamp = file_stamp(path)?;
        self.synced = true;
        Ok(())
    }
}

/// Snapshot-backed `NodeStore`: purely in memory, or persisted to a JSON file
/// that several processes may share.
pub struct SnapshotStore {
    state: RwLock<Loaded>,
    file: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Loaded {
                synced: true,
                ..Loaded::default()
            }),
            file: None,
        }
    }

    /// Open (or lazily create) the JSON snapshot at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut loaded = Loaded::default();
        {
            let _lock = StoreLock::acquire(path, false)?;
            loaded.reload(path)?;
        }
        tracing::debug!(
            path = %path.display(),
            hosts = loaded.snapshot.hosts.len(),
            "opened node store"
        );
        Ok(Self {
            state: RwLock::new(loaded),
            file: Some(path.to_path_buf()),
        })
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Loaded> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to a snapshot that matches the file as of this call.
    fn read(&self) -> Result<RwLockReadGuard<'_, Loaded>, StoreError> {
        if let Some(path) = self.file.as_deref() {
            let current = file_stamp(path)?;
            let stale = {
                let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
                !state.synced || state.stamp != current
            };
            if stale {
                let mut state = self.write_guard();
                let _lock = StoreLock::acquire(path, false)?;
                state.reload(path)?;
            }
        }
        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `change` and persist it as one commit.
    ///
    /// `change` must return its error before touching the snapshot. When the
    /// write fails the snapshot is reloaded from the file, which still holds the
    /// previous commit.
    fn commit<T>(&self, change: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut state = self.write_guard();
        let Some(path) = self.file.as_deref() else {
            return change(&mut state.snapshot);
        };

        let _lock = StoreLock::acquire(path, true)?;
        state.reload(path)?;
        let out = change(&mut state.snapshot)?;

        if let Err(e) = state.snapshot.save(path) {
            if state.reload(path).is_err() {
                state.snapshot = Snapshot::default();
            }
            return Err(e);
        }
        match file_stamp(path) {
            Ok(stamp) => state.stamp = stamp,
            Err(_) => state.synced = false,
        }
        Ok(out)
    }
}

impl NodeStore for SnapshotStore {
    fn upsert_host(&self, label: &str, address: &str) -> Result<Host, StoreError> {
        self.commit(|snap| Ok(snap.upsert_host(label, address)))
    }

    fn create_host(&self, label: &str, address: &str) -> Result<Host, StoreError> {
        self.commit(|snap| {
            if snap.host_by_address(address).is_some() {
                return Err(StoreError::Conflict(address.to_string()));
            }
            Ok(snap.insert_host(label, address))
        })
    }

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError> {
        Ok(self.read()?.snapshot.hosts.get(host_id).cloned())
    }

    fn list_hosts(&self) -> Result<Vec<HostSummary>, StoreError> {
        let state = self.read()?;
        let snap = &state.snapshot;
        let mut hosts: Vec<HostSummary> = snap
            .hosts
            .values()
            .map(|h| {
                let latest = snap.imports.get(&h.id).and_then(|runs| runs.last());
                HostSummary {
                    id: h.id.clone(),
                    label: h.label.clone(),
                    address: h.address.clone(),
                    updated_at: h.updated_at,
                    file_count: snap.nodes.get(&h.id).map_or(0, Vec::len),
                    root_path: latest.map(|r| r.root_path.clone()),
                    run_path: latest.map(|r| r.run_path.clone()),
                    run_parent_path: latest.map(|r| r.run_parent_path.clone()),
                    imported_at: latest.map(|r| r.imported_at),
                }
            })
            .collect();
        hosts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(hosts)
    }

    fn replace_host_nodes(
        &self,
        host_id: &str,
        entries: Vec<ValidatedEntry>,
        run: ImportRun,
    ) -> Result<usize, StoreError> {
        let nodes = prepare_nodes(entries);
        let written = self.commit(|snap| {
            if !snap.hosts.contains_key(host_id) {
                return Err(StoreError::UnknownHost(host_id.to_string()));
            }
            Ok(snap.swap_nodes(host_id, nodes, run))
        })?;
        tracing::info!(host_id, nodes = written, "replaced host nodes");
        Ok(written)
    }

    fn import_snapshot(
        &self,
        label: &str,
        address: &str,
        entries: Vec<ValidatedEntry>,
        run: ImportRun,
    ) -> Result<(Host, usize), StoreError> {
        let nodes = prepare_nodes(entries);
        let (host, written) = self.commit(|snap| {
            let host = snap.upsert_host(label, address);
            let written = snap.swap_nodes(&host.id, nodes, run);
            let host = snap.hosts.get(&host.id).cloned().unwrap_or(host);
            Ok((host, written))
        })?;
        tracing::info!(host_id = %host.id, nodes = written, "replaced host nodes");
        Ok((host, written))
    }

    fn list_nodes(&self, host_id: &str) -> Result<Vec<FileNode>, StoreError> {
        Ok(self.read()?.snapshot.nodes.get(host_id).cloned().unwrap_or_default())
    }

    fn get_node(&self, node_id: &str) -> Result<Option<FileNode>, StoreError> {
        let state = self.read()?;
        Ok(state
            .snapshot
            .nodes
            .values()
            .flat_map(|nodes| nodes.iter())
            .find(|n| n.id == node_id)
            .cloned())
    }

    fn latest_import(&self, host_id: &str) -> Result<Option<ImportRun>, StoreError> {
        Ok(self
            .read()?
            .snapshot
            .imports
            .get(host_id)
            .and_then(|runs| runs.last())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, node_type: NodeType, content: Option<&str>) -> ValidatedEntry {
        ValidatedEntry {
            path: path.into(),
            name: crate::paths::file_name(path).into(),
            node_type,
            size: None,
            mtime: None,
            is_hidden: false,
            content_type: match (node_type, content) {
                (NodeType::Dir, _) => ContentType::None,
                (NodeType::File, Some(_)) => ContentType::Text,
                (NodeType::File, None) => ContentType::Binary,
            },
            content: content.map(str::to_string),
            sha256: None,
        }
    }

    fn run(host_id: &str, count: usize) -> ImportRun {
        let now = Utc::now();
        ImportRun {
            host_id: host_id.into(),
            version: "1".into(),
            generated_at: now,
            imported_at: now,
            root_path: "/".into(),
            run_path: "/".into(),
            run_parent_path: "/".into(),
            entry_count: count,
            payload_size: 0,
            warnings: vec![],
        }
    }

    #[test]
    fn upsert_reuses_host_by_address() {
        let store = SnapshotStore::in_memory();
        let a = store.upsert_host("nas", "10.0.0.5").unwrap();
        let b = store.upsert_host("nas-renamed", "10.0.0.5").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.get_host(&a.id).unwrap().unwrap().label, "nas-renamed");
        assert_eq!(store.list_hosts().unwrap().len(), 1);
    }

    #[test]
    fn create_host_conflicts_on_address() {
        let store = SnapshotStore::in_memory();
        store.create_host("a", "10.0.0.1").unwrap();
        let err = store.create_host("b", "10.0.0.1").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn replace_swaps_the_whole_set() {
        let store = SnapshotStore::in_memory();
        let host = store.upsert_host("nas", "10.0.0.5").unwrap();

        store
            .replace_host_nodes(
                &host.id,
                vec![entry("old", NodeType::Dir, None), entry("old/a.txt", NodeType::File, Some("a"))],
                run(&host.id, 2),
            )
            .unwrap();
        store
            .replace_host_nodes(&host.id, vec![entry("new.txt", NodeType::File, Some("n"))], run(&host.id, 1))
            .unwrap();

        let nodes = store.list_nodes(&host.id).unwrap();
        assert_eq!(nodes.iter().map(|n| n.path.as_str()).collect::<Vec<_>>(), vec!["new.txt"]);
        assert_eq!(store.latest_import(&host.id).unwrap().unwrap().entry_count, 1);
    }

    #[test]
    fn only_text_files_keep_content() {
        let store = SnapshotStore::in_memory();
        let host = store.upsert_host("nas", "10.0.0.5").unwrap();
        let mut bin = entry("blob.bin", NodeType::File, None);
        bin.content = Some("should be dropped".into());

        store
            .replace_host_nodes(&host.id, vec![bin, entry("t.txt", NodeType::File, Some("keep"))], run(&host.id, 2))
            .unwrap();
        let nodes = store.list_nodes(&host.id).unwrap();
        assert_eq!(nodes[0].path, "blob.bin");
        assert!(nodes[0].content.is_none());
        assert_eq!(nodes[1].content.as_deref(), Some("keep"));

        let found = store.get_node(&nodes[1].id).unwrap().unwrap();
        assert_eq!(found.path, "t.txt");
    }

    #[test]
    fn replace_for_unknown_host_fails() {
        let store = SnapshotStore::in_memory();
        let err = store.replace_host_nodes("nope", vec![], run("nope", 0)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownHost(_)));
    }

    #[test]
    fn file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.json");

        let host_id = {
            let store = SnapshotStore::open(&path).unwrap();
            let host = store.upsert_host("nas", "10.0.0.5").unwrap();
            store
                .replace_host_nodes(&host.id, vec![entry("a.txt", NodeType::File, Some("x"))], run(&host.id, 1))
                .unwrap();
            host.id
        };

        let reopened = SnapshotStore::open(&path).unwrap();
        let hosts = reopened.list_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].file_count, 1);
        assert_eq!(reopened.list_nodes(&host_id).unwrap()[0].content.as_deref(), Some("x"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn node_ids_are_stable_per_host_and_path() {
        assert_eq!(node_id("h1", "a/b"), node_id("h1", "a/b"));
        assert_ne!(node_id("h1", "a/b"), node_id("h2", "a/b"));
    }

    #[test]
    fn import_snapshot_creates_host_and_nodes_together() {
        let store = SnapshotStore::in_memory();
        let (host, written) = store
            .import_snapshot(
                "nas",
                "10.0.0.5",
                vec![entry("etc", NodeType::Dir, None), entry("etc/motd", NodeType::File, Some("hi"))],
                run("", 2),
            )
            .unwrap();

        assert_eq!(written, 2);
        let nodes = store.list_nodes(&host.id).unwrap();
        assert!(nodes.iter().all(|n| n.host_id == host.id && n.id == node_id(&host.id, &n.path)));
        assert_eq!(store.latest_import(&host.id).unwrap().unwrap().host_id, host.id);

        let (again, _) = store
            .import_snapshot("nas-2", "10.0.0.5", vec![], run("", 0))
            .unwrap();
        assert_eq!(again.id, host.id);
        assert_eq!(again.label, "nas-2");
        assert!(store.list_nodes(&host.id).unwrap().is_empty());
    }

    #[test]
    fn handles_on_one_file_do_not_overwrite_each_other() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        let first = SnapshotStore::open(&path).unwrap();
        let second = SnapshotStore::open(&path).unwrap();

        first
            .import_snapshot("a", "10.0.0.1", vec![entry("a.txt", NodeType::File, Some("a"))], run("", 1))
            .unwrap();
        second
            .import_snapshot("b", "10.0.0.2", vec![entry("b.txt", NodeType::File, Some("b"))], run("", 1))
            .unwrap();

        // The first handle picks up the second handle's commit.
        let mut seen: Vec<String> = first.list_hosts().unwrap().into_iter().map(|h| h.address).collect();
        seen.sort();
        assert_eq!(seen, vec!["10.0.0.1", "10.0.0.2"]);

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.list_hosts().unwrap().len(), 2);
        assert!(reopened.list_hosts().unwrap().iter().all(|h| h.file_count == 1));
    }
}
