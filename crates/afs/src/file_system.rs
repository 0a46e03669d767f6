use std::fmt;
use std::sync::Arc;

use afs_core::{AppFileSystemStorage, NodeId, Result, StorageError};

/// A named drive: one storage plus how it may be shared.
#[derive(Clone)]
pub struct AppFileSystem {
    name: String,
    storage: Arc<dyn AppFileSystemStorage>,
    remotely_accessible: bool,
}

impl AppFileSystem {
    /// The drive takes the storage's file system name.
    pub fn new(storage: Arc<dyn AppFileSystemStorage>, remotely_accessible: bool) -> Self {
        AppFileSystem {
            name: storage.file_system_name().to_string(),
            storage,
            remotely_accessible,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<dyn AppFileSystemStorage> {
        &self.storage
    }

    pub fn is_remotely_accessible(&self) -> bool {
        self.remotely_accessible
    }

    pub fn root_node(&self) -> NodeId {
        self.storage.root_node()
    }

    /// Resolve a slash separated path of node names from the root.
    /// Empty segments are ignored, so `""` and `"/"` name the root.
    pub fn node_by_path(&self, path: &str) -> Result<Option<NodeId>> {
        let mut node = self.root_node();
        for name in path.split('/').filter(|segment| !segment.is_empty()) {
            match self.storage.child_node(&node, name)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Like [`node_by_path`](Self::node_by_path), failing when nothing is there.
    pub fn require_node(&self, path: &str) -> Result<NodeId> {
        self.node_by_path(path)?.ok_or_else(|| {
            StorageError::NotFound(format!("{}:/{}", self.name, path.trim_start_matches('/')))
        })
    }

    /// Slash separated path of a node, relative to the root.
    pub fn path_of(&self, id: &NodeId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = id.clone();
        while let Some(parent) = self.storage.parent_node(&current)? {
            names.push(self.storage.node_name(&current)?);
            current = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.storage.close()
    }
}

impl fmt::Debug for AppFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppFileSystem")
            .field("name", &self.name)
            .field("remotely_accessible", &self.remotely_accessible)
            .finish()
    }
}
