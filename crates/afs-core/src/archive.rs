//! Export and import of node subtrees as plain directories.
//!
//! Layout of one archived node:
//!
//! ```text
//! <url-encoded node id>/
//!     info.json           node fields, attributes and child order
//!     dependencies.json   outgoing edges (omitted when empty)
//!     data/<url-encoded data name>
//!     children/<child node dirs>
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::id::{NodeId, PseudoClass};
use crate::node::{NewNode, NodeGenericMetadata};
use crate::storage::AppFileSystemStorage;

const INFO_FILE: &str = "info.json";
const DEPENDENCIES_FILE: &str = "dependencies.json";
const DATA_DIR: &str = "data";
const CHILDREN_DIR: &str = "children";

#[derive(Debug, Serialize, Deserialize)]
struct ArchivedNode {
    id: String,
    name: String,
    pseudo_class: PseudoClass,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: i32,
    #[serde(default)]
    metadata: NodeGenericMetadata,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    /// Child directory names in child order.
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchivedDependency {
    name: String,
    target: String,
}

/// Archives subtrees of a storage through its public contract only, so any
/// backend can be the source and any writable backend the destination.
pub struct StorageArchive<'a> {
    storage: &'a dyn AppFileSystemStorage,
}

impl<'a> StorageArchive<'a> {
    pub fn new(storage: &'a dyn AppFileSystemStorage) -> Self {
        StorageArchive { storage }
    }

    /// Write `node` and its subtree into a new directory under `dir`,
    /// returning that directory.
    pub fn archive(&self, node: &NodeId, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        self.archive_node(node, dir)
    }

    fn archive_node(&self, node: &NodeId, parent_dir: &Path) -> Result<PathBuf> {
        let info = self.storage.node_info(node)?;
        let node_dir = parent_dir.join(dir_name(node));
        fs::create_dir(&node_dir)?;
        debug!(node = %node, dir = %node_dir.display(), "archiving node");

        let mut attributes = BTreeMap::new();
        for name in self.storage.string_attribute_names(node)? {
            if let Some(value) = self.storage.string_attribute(node, &name)? {
                attributes.insert(name, value);
            }
        }

        let data_names = self.storage.data_names(node)?;
        if !data_names.is_empty() {
            let data_dir = node_dir.join(DATA_DIR);
            fs::create_dir(&data_dir)?;
            for data_name in data_names {
                if let Some(bytes) = self.storage.read_binary_data(node, &data_name)? {
                    fs::write(data_dir.join(urlencoding::encode(&data_name).as_ref()), bytes)?;
                }
            }
        }

        let dependencies: Vec<ArchivedDependency> = self
            .storage
            .dependencies(node)?
            .into_iter()
            .map(|dep| ArchivedDependency {
                name: dep.name,
                target: dep.node.to_string(),
            })
            .collect();
        if !dependencies.is_empty() {
            write_json(&node_dir.join(DEPENDENCIES_FILE), &dependencies)?;
        }

        let child_nodes = self.storage.child_nodes(node)?;
        let mut children = Vec::with_capacity(child_nodes.len());
        if !child_nodes.is_empty() {
            let children_dir = node_dir.join(CHILDREN_DIR);
            fs::create_dir(&children_dir)?;
            for child in &child_nodes {
                self.archive_node(child, &children_dir)?;
                children.push(dir_name(child));
            }
        }

        let archived = ArchivedNode {
            id: node.to_string(),
            name: info.name,
            pseudo_class: info.pseudo_class,
            description: info.description,
            version: info.version,
            metadata: info.metadata,
            attributes,
            children,
        };
        write_json(&node_dir.join(INFO_FILE), &archived)?;

        Ok(node_dir)
    }

    /// Recreate an archived subtree under `parent`, returning the new id of
    /// its top node. Dependencies between archived nodes are re-linked to the
    /// new ids; dependencies on nodes outside the archive are kept when the
    /// target id resolves in this storage.
    pub fn unarchive(&self, parent: &NodeId, node_dir: &Path) -> Result<NodeId> {
        let mut ids = HashMap::new();
        let mut pending = Vec::new();
        let top = self.unarchive_node(parent, node_dir, &mut ids, &mut pending)?;

        for (source, dep) in pending {
            let target = match ids.get(&dep.target) {
                Some(id) => Some(NodeId::clone(id)),
                None => self.resolve_external(&dep.target),
            };
            match target {
                Some(target) => self.storage.add_dependency(&source, &dep.name, &target)?,
                None => {
                    warn!(source = %source, name = %dep.name, target = %dep.target, "dropping dependency on unknown node");
                }
            }
        }

        Ok(top)
    }

    fn unarchive_node(
        &self,
        parent: &NodeId,
        node_dir: &Path,
        ids: &mut HashMap<String, NodeId>,
        pending: &mut Vec<(NodeId, ArchivedDependency)>,
    ) -> Result<NodeId> {
        let archived: ArchivedNode = read_json(&node_dir.join(INFO_FILE))?;
        let node = self.storage.create_node(
            parent,
            NewNode::new(archived.name, archived.pseudo_class)
                .with_description(archived.description)
                .with_version(archived.version)
                .with_metadata(archived.metadata),
        )?;
        ids.insert(archived.id, node.clone());

        for (name, value) in &archived.attributes {
            self.storage.set_string_attribute(&node, name, Some(value))?;
        }

        let data_dir = node_dir.join(DATA_DIR);
        if data_dir.is_dir() {
            for entry in fs::read_dir(&data_dir)? {
                let entry = entry?;
                let file_name = entry.file_name();
                let encoded = file_name.to_string_lossy();
                let data_name = urlencoding::decode(&encoded).map_err(|e| {
                    StorageError::InvalidOperation(format!(
                        "bad data file name '{}': {}",
                        encoded, e
                    ))
                })?;
                let mut writer = self.storage.write_binary_data(&node, &data_name)?;
                writer.write_all(&fs::read(entry.path())?)?;
                writer.close()?;
            }
        }

        let dependencies_file = node_dir.join(DEPENDENCIES_FILE);
        if dependencies_file.is_file() {
            let dependencies: Vec<ArchivedDependency> = read_json(&dependencies_file)?;
            pending.extend(dependencies.into_iter().map(|dep| (node.clone(), dep)));
        }

        let children_dir = node_dir.join(CHILDREN_DIR);
        for child in &archived.children {
            self.unarchive_node(&node, &children_dir.join(child), ids, pending)?;
        }

        Ok(node)
    }

    fn resolve_external(&self, target: &str) -> Option<NodeId> {
        let id = self.storage.from_string(target).ok()?;
        self.storage.node_info(&id).ok().map(|_| id)
    }
}

fn dir_name(node: &NodeId) -> String {
    urlencoding::encode(&node.to_string()).into_owned()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
