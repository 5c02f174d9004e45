//! Rebuild a host's hierarchical tree from its flat node rows.
//!
//! Nodes live in an arena and are linked by index. Missing ancestors are
//! synthesized as placeholder directories without recursion, so arbitrarily
//! deep (but validated) paths cannot exhaust the stack.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{FileNode, NodeType, TreeNode};
use crate::paths::{file_name, parent};

const ROOT: usize = 0;

#[derive(Debug)]
struct ArenaNode {
    id: String,
    name: String,
    path: String,
    node_type: NodeType,
    children: Vec<usize>,
    placeholder: bool,
}

struct TreeArena {
    nodes: Vec<ArenaNode>,
    dirs: HashMap<String, usize>,
}

impl TreeArena {
    fn new() -> Self {
        let root = ArenaNode {
            id: "root".to_string(),
            name: "/".to_string(),
            path: String::new(),
            node_type: NodeType::Dir,
            children: Vec::new(),
            placeholder: false,
        };
        let mut dirs = HashMap::new();
        dirs.insert(String::new(), ROOT);
        Self {
            nodes: vec![root],
            dirs,
        }
    }

    fn attach(&mut self, parent_idx: usize, node: ArenaNode) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent_idx].children.push(idx);
        idx
    }

    /// Index of the directory at `path`, creating placeholders for it and any
    /// missing ancestors, outermost first.
    fn ensure_dir(&mut self, path: &str) -> usize {
        if let Some(&idx) = self.dirs.get(path) {
            return idx;
        }

        let mut missing: Vec<&str> = Vec::new();
        let mut cur = path;
        while !self.dirs.contains_key(cur) {
            missing.push(cur);
            cur = parent(cur).unwrap_or("");
        }

        let mut parent_idx = self.dirs[cur];
        for dir_path in missing.into_iter().rev() {
            let placeholder = ArenaNode {
                id: format!("placeholder:{dir_path}"),
                name: file_name(dir_path).to_string(),
                path: dir_path.to_string(),
                node_type: NodeType::Dir,
                children: Vec::new(),
                placeholder: true,
            };
            parent_idx = self.attach(parent_idx, placeholder);
            self.dirs.insert(dir_path.to_string(), parent_idx);
        }
        parent_idx
    }

    fn insert(&mut self, node: &FileNode) {
        if node.node_type == NodeType::Dir {
            // A child listed before its directory already created a placeholder: adopt it.
            if let Some(&idx) = self.dirs.get(node.path.as_str()) {
                let slot = &mut self.nodes[idx];
                if slot.placeholder {
                    slot.id = node.id.clone();
                    slot.name = node.name.clone();
                    slot.placeholder = false;
                    return;
                }
            }
        }

        let parent_idx = match parent(&node.path) {
            Some(p) => self.ensure_dir(p),
            None => ROOT,
        };
        let idx = self.attach(
            parent_idx,
            ArenaNode {
                id: node.id.clone(),
                name: node.name.clone(),
                path: node.path.clone(),
                node_type: node.node_type,
                children: Vec::new(),
                placeholder: false,
            },
        );
        if node.node_type == NodeType::Dir {
            self.dirs.insert(node.path.clone(), idx);
        }
    }

    fn sort_children(&mut self) {
        for idx in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[idx].children);
            children.sort_by(|&a, &b| compare_entries(&self.nodes[a], &self.nodes[b]));
            self.nodes[idx].children = children;
        }
    }

    /// Children always sit at higher indices than their parent, so a reverse
    /// sweep builds every subtree before the node that owns it.
    fn into_roots(self) -> Vec<TreeNode> {
        let mut built: Vec<Option<TreeNode>> = (0..self.nodes.len()).map(|_| None).collect();
        for (idx, node) in self.nodes.into_iter().enumerate().rev() {
            let children = node
                .children
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            built[idx] = Some(TreeNode {
                id: node.id,
                name: node.name,
                path: node.path,
                node_type: node.node_type,
                children,
            });
        }
        built[ROOT].take().map(|root| root.children).unwrap_or_default()
    }
}

fn compare_entries(a: &ArenaNode, b: &ArenaNode) -> Ordering {
    match (a.node_type, b.node_type) {
        (NodeType::Dir, NodeType::File) => Ordering::Less,
        (NodeType::File, NodeType::Dir) => Ordering::Greater,
        _ => compare_names(&a.name, &b.name),
    }
}

/// Locale-style name ordering: case-insensitive first, exact bytes as the tiebreak.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Build the sorted root-level tree for one host's nodes (any input order).
pub fn build_tree(nodes: &[FileNode]) -> Vec<TreeNode> {
    let mut arena = TreeArena::new();
    for node in nodes {
        arena.insert(node);
    }
    arena.sort_children();
    arena.into_roots()
}
