use std::io::{self, Cursor, Read};

use crate::data::{check_data_source_attribute, DataSource, DataWriter, NodeDataSource};
use crate::error::{Result, StorageError};
use crate::events::EventsBus;
use crate::id::{NodeId, PseudoClass};
use crate::node::{NewNode, NodeDependency, NodeGenericMetadata, NodeInfo};

/// Name of the folder seeded inside every project.
pub const PROJECT_ROOT_NAME: &str = "root";

/// Contract shared by every storage backend.
///
/// Calls are synchronous. Reads may run concurrently; mutations must be
/// serialized by the caller. Every successful mutation publishes its events
/// on [`events_bus`](Self::events_bus) after the change is visible.
pub trait AppFileSystemStorage: Send + Sync {
    /// Name of the file system, also the name of its root node.
    fn file_system_name(&self) -> &str;

    fn is_remote(&self) -> bool {
        false
    }

    fn events_bus(&self) -> &EventsBus;

    /// The single root folder.
    fn root_node(&self) -> NodeId;

    /// Parse the string form of an id issued by this storage.
    fn from_string(&self, s: &str) -> Result<NodeId>;

    fn node_info(&self, id: &NodeId) -> Result<NodeInfo>;

    fn node_name(&self, id: &NodeId) -> Result<String> {
        Ok(self.node_info(id)?.name)
    }

    fn node_pseudo_class(&self, id: &NodeId) -> Result<PseudoClass> {
        Ok(self.node_info(id)?.pseudo_class)
    }

    /// Children of a node; empty for leaves.
    fn child_nodes(&self, id: &NodeId) -> Result<Vec<NodeId>>;

    fn child_node(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>>;

    /// `None` only for the root.
    fn parent_node(&self, id: &NodeId) -> Result<Option<NodeId>>;

    /// Move a node with everything attached to it under a new parent.
    fn set_parent_node(&self, id: &NodeId, new_parent: &NodeId) -> Result<()>;

    fn is_writable(&self, id: &NodeId) -> Result<bool>;

    fn create_node(&self, parent: &NodeId, node: NewNode) -> Result<NodeId>;

    /// Delete a node and its whole subtree, returning the former parent.
    fn delete_node(&self, id: &NodeId) -> Result<NodeId>;

    fn rename_node(&self, id: &NodeId, name: &str) -> Result<()>;

    fn set_description(&self, id: &NodeId, description: &str) -> Result<()>;

    /// Replace the node's generic metadata.
    fn set_metadata(&self, id: &NodeId, metadata: NodeGenericMetadata) -> Result<()>;

    fn update_modification_time(&self, id: &NodeId) -> Result<()>;

    /// `None` when the attribute is not set.
    fn string_attribute(&self, id: &NodeId, name: &str) -> Result<Option<String>>;

    /// Setting `None` removes the attribute.
    fn set_string_attribute(&self, id: &NodeId, name: &str, value: Option<&str>) -> Result<()>;

    /// Names of the string attributes set on a node, sorted.
    fn string_attribute_names(&self, id: &NodeId) -> Result<Vec<String>>;

    fn read_string_attribute(&self, id: &NodeId, name: &str) -> Result<Option<Box<dyn Read + '_>>> {
        Ok(self
            .string_attribute(id, name)?
            .map(|value| Box::new(Cursor::new(value.into_bytes())) as Box<dyn Read>))
    }

    /// Streamed attribute writer; the value is stored when it is closed.
    fn write_string_attribute(&self, id: &NodeId, name: &str) -> Result<DataWriter<'_>> {
        self.node_info(id)?;
        let id = id.clone();
        let name = name.to_string();
        Ok(DataWriter::new(move |bytes| {
            let value = String::from_utf8(bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.set_string_attribute(&id, &name, Some(&value))
        }))
    }

    /// `None` when no data is stored under `name`.
    fn read_binary_data(&self, id: &NodeId, name: &str) -> Result<Option<Vec<u8>>>;

    /// Data becomes visible when the returned writer is closed.
    fn write_binary_data(&self, id: &NodeId, name: &str) -> Result<DataWriter<'_>>;

    fn data_exists(&self, id: &NodeId, name: &str) -> Result<bool>;

    fn data_names(&self, id: &NodeId) -> Result<Vec<String>>;

    /// Returns false if there was nothing to remove.
    fn remove_data(&self, id: &NodeId, name: &str) -> Result<bool>;

    /// Blob-backed file set named `name` on a node.
    fn data_source_attribute(&self, id: &NodeId, name: &str) -> Result<Box<dyn DataSource + '_>> {
        check_data_source_attribute(name)?;
        let base_name = self.node_name(id)?;
        Ok(Box::new(NodeDataSource::new(self, id.clone(), name, base_name)))
    }

    /// Point the dependency slot `name` of `id` at `target`. An existing
    /// target under the same name is replaced.
    fn add_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()>;

    /// `None` when `id` has no dependency named `name`.
    fn dependency(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>>;

    fn dependencies(&self, id: &NodeId) -> Result<Vec<NodeDependency>>;

    /// Targets of the dependencies named `name`.
    fn dependencies_named(&self, id: &NodeId, name: &str) -> Result<Vec<NodeId>> {
        Ok(self.dependency(id, name)?.into_iter().collect())
    }

    /// Distinct nodes with a dependency on `id`.
    fn backward_dependencies(&self, id: &NodeId) -> Result<Vec<NodeId>>;

    /// Fails with `NotFound` if the edge does not exist.
    fn remove_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()>;

    /// Create a project under `parent`, seeded with its root folder.
    fn create_project(&self, parent: &NodeId, name: &str, description: &str) -> Result<NodeId> {
        let project = self.create_node(
            parent,
            NewNode::new(name, PseudoClass::project()).with_description(description),
        )?;
        self.create_node(
            &project,
            NewNode::new(PROJECT_ROOT_NAME, PseudoClass::project_folder()),
        )?;
        Ok(project)
    }

    fn project_root_node(&self, project: &NodeId) -> Result<NodeId> {
        let pseudo_class = self.node_pseudo_class(project)?;
        if pseudo_class != PseudoClass::PROJECT {
            return Err(StorageError::InvalidOperation(format!(
                "node {} is a {}, not a project",
                project, pseudo_class
            )));
        }
        self.child_node(project, PROJECT_ROOT_NAME)?.ok_or_else(|| {
            StorageError::NotFound(format!("root folder of project {}", project))
        })
    }

    /// Make every prior mutation durable.
    fn flush(&self) -> Result<()>;

    /// Release resources. The storage must not be used afterwards.
    fn close(&self) -> Result<()>;
}

/// Reject metadata holding doubles that cannot be stored losslessly.
pub fn check_metadata(metadata: &NodeGenericMetadata) -> Result<()> {
    match metadata.doubles().iter().find(|(_, value)| !value.is_finite()) {
        Some((name, value)) => Err(StorageError::InvalidOperation(format!(
            "metadata double '{}' is not finite: {}",
            name, value
        ))),
        None => Ok(()),
    }
}

/// Reject empty node names.
pub fn check_node_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidOperation(
            "node name must not be empty".to_string(),
        ));
    }
    Ok(())
}
