//! Kernel-facing node tree.
//!
//! Nodes are keyed by inode number because that is how the kernel
//! addresses them; each node carries its remote path and a lazily
//! populated child map. The child map is authoritative between
//! enumerations and is patched by create, remove and rename. Children
//! hold paths rather than parent pointers; reparenting on rename is done
//! by the table, which has both directories in hand.

use std::collections::HashMap;

use tetherfs_transport::{FileStat, RemotePath, RemoteRoot};

pub const ROOT_INODE: u64 = 1;

/// One node of the projected tree.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    pub ino: u64,
    pub parent: u64,
    pub name: String,
    pub is_dir: bool,
    pub path: RemotePath,
    /// `None` until the first enumeration of this directory.
    pub children: Option<HashMap<String, u64>>,
    /// Last stat the remote reported for this path.
    pub stat: FileStat,
}

/// Inode-keyed table of every live node.
pub struct NodeTable {
    entries: HashMap<u64, RemoteNode>,
    next_ino: u64,
}

impl NodeTable {
    /// Builds the table with the filesystem root (inode 1) and one child
    /// per configured remote root, named by hostname. The root's child map
    /// is complete from the start; listing it never needs the network.
    pub fn new(roots: &[RemoteRoot]) -> Self {
        let mut table = Self {
            entries: HashMap::new(),
            next_ino: 2,
        };
        let mut root_children = HashMap::new();
        for root in roots {
            let ino = table.next_ino;
            table.next_ino += 1;
            table.entries.insert(
                ino,
                RemoteNode {
                    ino,
                    parent: ROOT_INODE,
                    name: root.hostname.clone(),
                    is_dir: true,
                    path: root.root_path(),
                    children: None,
                    stat: FileStat {
                        name: root.hostname.clone(),
                        is_dir: true,
                        mode: 0o755,
                        ..FileStat::default()
                    },
                },
            );
            root_children.insert(root.hostname.clone(), ino);
        }
        table.entries.insert(
            ROOT_INODE,
            RemoteNode {
                ino: ROOT_INODE,
                parent: ROOT_INODE,
                name: "/".to_string(),
                is_dir: true,
                path: RemotePath::new("", 0, "/"),
                children: Some(root_children),
                stat: FileStat {
                    name: "/".to_string(),
                    is_dir: true,
                    mode: 0o755,
                    ..FileStat::default()
                },
            },
        );
        table
    }

    pub fn get(&self, ino: u64) -> Option<&RemoteNode> {
        self.entries.get(&ino)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut RemoteNode> {
        self.entries.get_mut(&ino)
    }

    /// Child inode by name, `None` on miss or unenumerated parent.
    pub fn lookup_child(&self, parent: u64, name: &str) -> Option<u64> {
        self.entries
            .get(&parent)?
            .children
            .as_ref()?
            .get(name)
            .copied()
    }

    /// True once the directory has a populated child map.
    pub fn is_enumerated(&self, ino: u64) -> bool {
        self.entries
            .get(&ino)
            .map(|n| n.children.is_some())
            .unwrap_or(false)
    }

    /// Inserts a freshly created child and links it into the parent's map.
    pub fn alloc_child(&mut self, parent: u64, name: &str, is_dir: bool, stat: FileStat) -> u64 {
        let parent_path = self.entries[&parent].path.clone();
        let ino = self.next_ino;
        self.next_ino += 1;
        self.entries.insert(
            ino,
            RemoteNode {
                ino,
                parent,
                name: name.to_string(),
                is_dir,
                path: parent_path.join(name),
                children: None,
                stat,
            },
        );
        if let Some(node) = self.entries.get_mut(&parent) {
            node.children
                .get_or_insert_with(HashMap::new)
                .insert(name.to_string(), ino);
        }
        ino
    }

    /// Replaces a directory's child map from an enumeration result.
    ///
    /// Known names keep their node identity (with the stat refreshed);
    /// new names get fresh nodes; names the listing no longer contains are
    /// dropped with their subtrees.
    pub fn set_children(&mut self, parent: u64, stats: &[FileStat]) {
        let (parent_path, old_children) = match self.entries.get_mut(&parent) {
            Some(node) => (node.path.clone(), node.children.take().unwrap_or_default()),
            None => return,
        };

        let mut children = HashMap::with_capacity(stats.len());
        for stat in stats {
            match old_children.get(&stat.name) {
                Some(&ino) => {
                    if let Some(node) = self.entries.get_mut(&ino) {
                        node.is_dir = stat.is_dir;
                        node.stat = stat.clone();
                    }
                    children.insert(stat.name.clone(), ino);
                }
                None => {
                    let ino = self.next_ino;
                    self.next_ino += 1;
                    self.entries.insert(
                        ino,
                        RemoteNode {
                            ino,
                            parent,
                            name: stat.name.clone(),
                            is_dir: stat.is_dir,
                            path: parent_path.join(&stat.name),
                            children: None,
                            stat: stat.clone(),
                        },
                    );
                    children.insert(stat.name.clone(), ino);
                }
            }
        }

        for (name, ino) in old_children {
            if !children.contains_key(&name) {
                self.drop_subtree(ino);
            }
        }

        if let Some(node) = self.entries.get_mut(&parent) {
            node.children = Some(children);
        }
    }

    /// Unlinks `name` from `parent` and drops its subtree.
    pub fn remove_child(&mut self, parent: u64, name: &str) {
        let removed = self
            .entries
            .get_mut(&parent)
            .and_then(|n| n.children.as_mut())
            .and_then(|c| c.remove(name));
        if let Some(ino) = removed {
            self.drop_subtree(ino);
        }
    }

    fn drop_subtree(&mut self, ino: u64) {
        if let Some(node) = self.entries.remove(&ino) {
            if let Some(children) = node.children {
                for child in children.into_values() {
                    self.drop_subtree(child);
                }
            }
        }
    }

    /// Reparents a child after a successful rename: same node object, new
    /// parent link, new name, new path. A moved directory forgets its
    /// enumeration so descendants re-resolve under the new path.
    pub fn move_child(&mut self, parent: u64, name: &str, new_parent: u64, new_name: &str) {
        let ino = match self
            .entries
            .get_mut(&parent)
            .and_then(|n| n.children.as_mut())
            .and_then(|c| c.remove(name))
        {
            Some(ino) => ino,
            None => return,
        };

        // An existing destination entry is replaced, as the remote move
        // replaced it there.
        let displaced = self
            .entries
            .get_mut(&new_parent)
            .and_then(|n| n.children.as_mut())
            .and_then(|c| c.remove(new_name));
        if let Some(old) = displaced {
            self.drop_subtree(old);
        }

        let new_path = match self.entries.get(&new_parent) {
            Some(node) => node.path.join(new_name),
            None => return,
        };
        if let Some(node) = self.entries.get_mut(&ino) {
            node.parent = new_parent;
            node.name = new_name.to_string();
            node.path = new_path;
            node.children = None;
        }
        if let Some(node) = self.entries.get_mut(&new_parent) {
            node.children
                .get_or_insert_with(HashMap::new)
                .insert(new_name.to_string(), ino);
        }
    }

    /// Live node count, including the root.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
