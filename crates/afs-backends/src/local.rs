//! Read-only view of a directory tree.
//!
//! Node ids are absolute paths under the configured root. Directories are
//! folders; files show up only when one of the configured scanners
//! recognizes them.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use afs_core::{
    AppFileSystemStorage, DataSource, DataWriter, EventsBus, NewNode, NodeDependency,
    NodeGenericMetadata, NodeId, NodeInfo, PseudoClass, Result, StorageError,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::scanner::{LocalFile, LocalFileScanner};

const BACKEND: &str = "local";

/// Storage exposing a local directory through recognizers.
pub struct LocalStorage {
    name: String,
    root: PathBuf,
    scanners: Vec<Box<dyn LocalFileScanner>>,
    scanned: RwLock<HashMap<PathBuf, Option<Arc<LocalFile>>>>,
    bus: Arc<EventsBus>,
}

impl LocalStorage {
    /// Expose `root`, creating it if it does not exist yet.
    pub fn new(
        file_system_name: impl Into<String>,
        root: impl AsRef<Path>,
        scanners: Vec<Box<dyn LocalFileScanner>>,
        bus: Arc<EventsBus>,
    ) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(StorageError::InvalidOperation(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let name = file_system_name.into();
        info!(file_system = %name, root = %root.display(), scanners = scanners.len(), "opened local storage");
        Ok(LocalStorage {
            name,
            root,
            scanners,
            scanned: RwLock::new(HashMap::new()),
            bus,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// Forget cached scan results, so files changed on disk are recognized again.
    pub fn refresh(&self) {
        self.scanned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn scan(&self, path: &Path) -> Option<Arc<LocalFile>> {
        if let Some(cached) = self
            .scanned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
        {
            return cached.clone();
        }

        let file = self
            .scanners
            .iter()
            .find_map(|scanner| scanner.scan(path))
            .map(Arc::new);
        debug!(path = %path.display(), recognized = file.is_some(), "scanned file");
        self.scanned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), file.clone());
        file
    }

    fn path_of<'a>(&self, id: &'a NodeId) -> Result<&'a Path> {
        id.as_path()
            .filter(|path| path.starts_with(&self.root))
            .ok_or_else(|| StorageError::InvalidReference {
                id: id.to_string(),
                backend: BACKEND,
            })
    }

    /// What the node at `path` is, or `None` if it is not visible.
    ///
    /// Names that are not valid UTF-8 are hidden, as are links resolving
    /// outside the root.
    fn entry(&self, path: &Path) -> Option<Entry> {
        if path != self.root && path.file_name().and_then(|name| name.to_str()).is_none() {
            return None;
        }
        let resolved = path.canonicalize().ok()?;
        if !resolved.starts_with(&self.root) {
            debug!(path = %path.display(), "skipped path resolving outside the root");
            return None;
        }
        let metadata = fs::metadata(&resolved).ok()?;
        if metadata.is_dir() {
            Some(Entry::Directory(metadata))
        } else if metadata.is_file() {
            self.scan(path).map(|file| Entry::File(metadata, file))
        } else {
            None
        }
    }

    fn existing(&self, id: &NodeId) -> Result<(PathBuf, Entry)> {
        let path = self.path_of(id)?;
        let entry = self
            .entry(path)
            .ok_or_else(|| StorageError::node_not_found(id))?;
        Ok((path.to_path_buf(), entry))
    }

    fn local_file(&self, id: &NodeId) -> Result<Option<Arc<LocalFile>>> {
        Ok(match self.existing(id)?.1 {
            Entry::File(_, file) => Some(file),
            Entry::Directory(_) => None,
        })
    }
}

enum Entry {
    Directory(fs::Metadata),
    File(fs::Metadata, Arc<LocalFile>),
}

impl Entry {
    fn metadata(&self) -> &fs::Metadata {
        match self {
            Entry::Directory(metadata) | Entry::File(metadata, _) => metadata,
        }
    }
}

fn file_time(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    let time = DateTime::<Utc>::from(time.ok()?);
    DateTime::from_timestamp_millis(time.timestamp_millis())
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl AppFileSystemStorage for LocalStorage {
    fn file_system_name(&self) -> &str {
        &self.name
    }

    fn events_bus(&self) -> &EventsBus {
        &self.bus
    }

    fn root_node(&self) -> NodeId {
        NodeId::from_path(self.root.clone())
    }

    fn from_string(&self, s: &str) -> Result<NodeId> {
        let path = Path::new(s);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if !path.is_absolute() || escapes || !path.starts_with(&self.root) {
            return Err(StorageError::InvalidReference {
                id: s.to_string(),
                backend: BACKEND,
            });
        }
        Ok(NodeId::from_path(path))
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id))]
    fn node_info(&self, id: &NodeId) -> Result<NodeInfo> {
        let (path, entry) = self.existing(id)?;
        let metadata = entry.metadata();
        let modification_time = file_time(metadata.modified()).unwrap_or_default();
        let creation_time = file_time(metadata.created()).unwrap_or(modification_time);

        let name = if path == self.root {
            self.name.clone()
        } else {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .unwrap_or_default()
        };

        let (pseudo_class, description, node_metadata) = match &entry {
            Entry::Directory(_) => (
                PseudoClass::folder(),
                String::new(),
                NodeGenericMetadata::default(),
            ),
            Entry::File(_, file) => (
                file.pseudo_class.clone(),
                file.description.clone(),
                file.metadata.clone(),
            ),
        };

        Ok(NodeInfo {
            id: id.clone(),
            name,
            pseudo_class,
            description,
            version: 0,
            creation_time,
            modification_time,
            metadata: node_metadata,
        })
    }

    fn child_nodes(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let (path, entry) = self.existing(id)?;
        if let Entry::File(..) = entry {
            return Ok(Vec::new());
        }

        let mut children = Vec::new();
        for dir_entry in fs::read_dir(&path)? {
            let child = dir_entry?.path();
            if self.entry(&child).is_some() {
                children.push(child);
            }
        }
        children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(children.into_iter().map(NodeId::from_path).collect())
    }

    fn child_node(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>> {
        let (path, entry) = self.existing(id)?;
        if matches!(entry, Entry::File(..)) || !is_plain_name(name) {
            return Ok(None);
        }
        let child = path.join(name);
        Ok(self.entry(&child).map(|_| NodeId::from_path(child)))
    }

    fn parent_node(&self, id: &NodeId) -> Result<Option<NodeId>> {
        let (path, _) = self.existing(id)?;
        if path == self.root {
            return Ok(None);
        }
        Ok(path.parent().map(NodeId::from_path))
    }

    fn set_parent_node(&self, _id: &NodeId, _new_parent: &NodeId) -> Result<()> {
        Err(StorageError::unsupported("set_parent_node", BACKEND))
    }

    fn is_writable(&self, id: &NodeId) -> Result<bool> {
        self.existing(id)?;
        Ok(false)
    }

    fn create_node(&self, _parent: &NodeId, _node: NewNode) -> Result<NodeId> {
        Err(StorageError::unsupported("create_node", BACKEND))
    }

    fn delete_node(&self, _id: &NodeId) -> Result<NodeId> {
        Err(StorageError::unsupported("delete_node", BACKEND))
    }

    fn rename_node(&self, _id: &NodeId, _name: &str) -> Result<()> {
        Err(StorageError::unsupported("rename_node", BACKEND))
    }

    fn set_description(&self, _id: &NodeId, _description: &str) -> Result<()> {
        Err(StorageError::unsupported("set_description", BACKEND))
    }

    fn set_metadata(&self, _id: &NodeId, _metadata: NodeGenericMetadata) -> Result<()> {
        Err(StorageError::unsupported("set_metadata", BACKEND))
    }

    fn update_modification_time(&self, _id: &NodeId) -> Result<()> {
        Err(StorageError::unsupported("update_modification_time", BACKEND))
    }

    fn string_attribute(&self, id: &NodeId, name: &str) -> Result<Option<String>> {
        Ok(self
            .local_file(id)?
            .and_then(|file| file.attributes.get(name).cloned()))
    }

    fn set_string_attribute(&self, _id: &NodeId, _name: &str, _value: Option<&str>) -> Result<()> {
        Err(StorageError::unsupported("set_string_attribute", BACKEND))
    }

    fn string_attribute_names(&self, id: &NodeId) -> Result<Vec<String>> {
        Ok(self
            .local_file(id)?
            .map(|file| file.attributes.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn write_string_attribute(&self, _id: &NodeId, _name: &str) -> Result<DataWriter<'_>> {
        Err(StorageError::unsupported("write_string_attribute", BACKEND))
    }

    fn read_binary_data(&self, id: &NodeId, _name: &str) -> Result<Option<Vec<u8>>> {
        self.existing(id)?;
        Ok(None)
    }

    fn write_binary_data(&self, _id: &NodeId, _name: &str) -> Result<DataWriter<'_>> {
        Err(StorageError::unsupported("write_binary_data", BACKEND))
    }

    fn data_exists(&self, id: &NodeId, _name: &str) -> Result<bool> {
        self.existing(id)?;
        Ok(false)
    }

    fn data_names(&self, id: &NodeId) -> Result<Vec<String>> {
        self.existing(id)?;
        Ok(Vec::new())
    }

    fn remove_data(&self, _id: &NodeId, _name: &str) -> Result<bool> {
        Err(StorageError::unsupported("remove_data", BACKEND))
    }

    fn data_source_attribute(&self, id: &NodeId, name: &str) -> Result<Box<dyn DataSource + '_>> {
        let source = self
            .local_file(id)?
            .and_then(|file| file.data_sources.get(name).cloned())
            .ok_or_else(|| StorageError::NotFound(format!("data source '{}' of node {}", name, id)))?;
        Ok(Box::new(source))
    }

    fn add_dependency(&self, _id: &NodeId, _name: &str, _target: &NodeId) -> Result<()> {
        Err(StorageError::unsupported("add_dependency", BACKEND))
    }

    fn dependency(&self, id: &NodeId, _name: &str) -> Result<Option<NodeId>> {
        self.existing(id)?;
        Ok(None)
    }

    fn dependencies(&self, id: &NodeId) -> Result<Vec<NodeDependency>> {
        self.existing(id)?;
        Ok(Vec::new())
    }

    fn backward_dependencies(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        self.existing(id)?;
        Ok(Vec::new())
    }

    fn remove_dependency(&self, _id: &NodeId, _name: &str, _target: &NodeId) -> Result<()> {
        Err(StorageError::unsupported("remove_dependency", BACKEND))
    }

    fn create_project(&self, _parent: &NodeId, _name: &str, _description: &str) -> Result<NodeId> {
        Err(StorageError::unsupported("create_project", BACKEND))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
