use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use afs_core::{
    check_metadata, check_node_name, now_millis, AppFileSystemStorage, DataWriter,
    DependencyGraph, EventsBus, NewNode, NodeDependency, NodeEvent, NodeGenericMetadata, NodeId,
    NodeInfo, PseudoClass, Result, StorageError,
};
use tracing::{debug, instrument};

use crate::common::{dependency_added_events, dependency_removed_events, parse_uuid_id, Emitter};

const BACKEND: &str = "heap";

struct NodeRecord {
    info: NodeInfo,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    data: BTreeMap<String, Vec<u8>>,
}

impl NodeRecord {
    fn new(info: NodeInfo, parent: Option<NodeId>) -> Self {
        NodeRecord {
            info,
            parent,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }
}

struct HeapState {
    nodes: HashMap<NodeId, NodeRecord>,
    dependencies: DependencyGraph<NodeId>,
}

impl HeapState {
    fn node(&self, id: &NodeId) -> Result<&NodeRecord> {
        self.nodes
            .get(id)
            .ok_or_else(|| StorageError::node_not_found(id))
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut NodeRecord> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| StorageError::node_not_found(id))
    }

    fn child_named(&self, parent: &NodeId, name: &str) -> Result<Option<NodeId>> {
        Ok(self
            .node(parent)?
            .children
            .iter()
            .find(|child| {
                self.nodes
                    .get(*child)
                    .is_some_and(|record| record.info.name == name)
            })
            .cloned())
    }

    /// True if `id` is `ancestor` or lies in its subtree.
    fn is_in_subtree(&self, id: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = Some(id.clone());
        while let Some(node) = current {
            if node == *ancestor {
                return true;
            }
            current = self.nodes.get(&node).and_then(|r| r.parent.clone());
        }
        false
    }

    /// Ids of `id` and all its descendants, parents before children.
    fn subtree(&self, id: &NodeId) -> Vec<NodeId> {
        let mut ids = vec![id.clone()];
        let mut i = 0;
        while i < ids.len() {
            if let Some(record) = self.nodes.get(&ids[i]) {
                ids.extend(record.children.iter().cloned());
            }
            i += 1;
        }
        ids
    }
}

/// Storage keeping everything in process memory.
///
/// Contents are lost when the storage is dropped. Mainly for tests and
/// scratch drives.
pub struct HeapStorage {
    name: String,
    root: NodeId,
    state: RwLock<HeapState>,
    emitter: Emitter,
}

impl HeapStorage {
    /// Create an empty storage with its own events bus.
    pub fn new(file_system_name: impl Into<String>) -> Self {
        Self::with_events_bus(file_system_name, Arc::new(EventsBus::new()))
    }

    /// Create an empty storage publishing on a shared events bus.
    pub fn with_events_bus(file_system_name: impl Into<String>, bus: Arc<EventsBus>) -> Self {
        let name = file_system_name.into();
        let root = NodeId::new_uuid();
        let info = NewNode::folder(name.clone()).into_info(root.clone());

        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), NodeRecord::new(info, None));

        HeapStorage {
            emitter: Emitter::new(&name, bus),
            name,
            root,
            state: RwLock::new(HeapState {
                nodes,
                dependencies: DependencyGraph::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HeapState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HeapState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update_info(&self, id: &NodeId, update: impl FnOnce(&mut NodeInfo)) -> Result<()> {
        let mut state = self.write();
        update(&mut state.node_mut(id)?.info);
        Ok(())
    }

    fn store_data(&self, id: &NodeId, name: &str, bytes: Vec<u8>) -> Result<()> {
        {
            let mut state = self.write();
            state.node_mut(id)?.data.insert(name.to_string(), bytes);
        }
        debug!(id = %id, data_name = %name, "stored binary data");
        self.emitter.emit(NodeEvent::NodeDataUpdated {
            id: id.clone(),
            data_name: name.to_string(),
        });
        Ok(())
    }

    /// Check that the dependency graph and the node table agree.
    #[doc(hidden)]
    pub fn dependencies_consistent(&self) -> bool {
        let state = self.read();
        state.dependencies.is_consistent()
    }
}

impl AppFileSystemStorage for HeapStorage {
    fn file_system_name(&self) -> &str {
        &self.name
    }

    fn events_bus(&self) -> &EventsBus {
        self.emitter.bus()
    }

    fn root_node(&self) -> NodeId {
        self.root.clone()
    }

    fn from_string(&self, s: &str) -> Result<NodeId> {
        parse_uuid_id(s, BACKEND)
    }

    fn node_info(&self, id: &NodeId) -> Result<NodeInfo> {
        Ok(self.read().node(id)?.info.clone())
    }

    fn child_nodes(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        Ok(self.read().node(id)?.children.clone())
    }

    fn child_node(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>> {
        self.read().child_named(id, name)
    }

    fn parent_node(&self, id: &NodeId) -> Result<Option<NodeId>> {
        Ok(self.read().node(id)?.parent.clone())
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id, new_parent = %new_parent))]
    fn set_parent_node(&self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        let old_parent = {
            let mut state = self.write();
            let record = state.node(id)?;
            let name = record.info.name.clone();
            let old_parent = record.parent.clone().ok_or_else(|| {
                StorageError::InvalidOperation("cannot move the root node".to_string())
            })?;
            state.node(new_parent)?;

            if old_parent == *new_parent {
                return Ok(());
            }
            if state.is_in_subtree(new_parent, id) {
                return Err(StorageError::InvalidOperation(format!(
                    "cannot move node {} under its own subtree",
                    id
                )));
            }
            if state.child_named(new_parent, &name)?.is_some() {
                return Err(StorageError::already_exists(new_parent, &name));
            }

            state.node_mut(&old_parent)?.children.retain(|c| c != id);
            state.node_mut(new_parent)?.children.push(id.clone());
            state.node_mut(id)?.parent = Some(new_parent.clone());
            old_parent
        };

        debug!("moved node");
        self.emitter.emit(NodeEvent::ParentChanged {
            id: id.clone(),
            old_parent,
            new_parent: new_parent.clone(),
        });
        Ok(())
    }

    fn is_writable(&self, id: &NodeId) -> Result<bool> {
        self.read().node(id)?;
        Ok(true)
    }

    #[instrument(skip(self, node), fields(backend = BACKEND, parent = %parent, name = %node.name))]
    fn create_node(&self, parent: &NodeId, node: NewNode) -> Result<NodeId> {
        check_node_name(&node.name)?;
        check_metadata(&node.metadata)?;
        let id = NodeId::new_uuid();
        {
            let mut state = self.write();
            if state.child_named(parent, &node.name)?.is_some() {
                return Err(StorageError::already_exists(parent, &node.name));
            }
            let info = node.into_info(id.clone());
            state
                .nodes
                .insert(id.clone(), NodeRecord::new(info, Some(parent.clone())));
            state.node_mut(parent)?.children.push(id.clone());
        }

        debug!(id = %id, "created node");
        self.emitter.emit(NodeEvent::NodeCreated {
            id: id.clone(),
            parent: parent.clone(),
        });
        Ok(id)
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id))]
    fn delete_node(&self, id: &NodeId) -> Result<NodeId> {
        let parent = {
            let mut state = self.write();
            let parent = state.node(id)?.parent.clone().ok_or_else(|| {
                StorageError::InvalidOperation("cannot delete the root node".to_string())
            })?;

            let subtree = state.subtree(id);
            for node in &subtree {
                state.nodes.remove(node);
                state.dependencies.remove_node(node);
            }
            state.node_mut(&parent)?.children.retain(|c| c != id);
            debug!(removed = subtree.len(), "deleted subtree");
            parent
        };

        self.emitter.emit(NodeEvent::NodeRemoved {
            id: id.clone(),
            parent: parent.clone(),
        });
        Ok(parent)
    }

    fn rename_node(&self, id: &NodeId, name: &str) -> Result<()> {
        check_node_name(name)?;
        {
            let mut state = self.write();
            let parent = state.node(id)?.parent.clone().ok_or_else(|| {
                StorageError::InvalidOperation("cannot rename the root node".to_string())
            })?;
            match state.child_named(&parent, name)? {
                Some(existing) if existing == *id => return Ok(()),
                Some(_) => return Err(StorageError::already_exists(&parent, name)),
                None => {}
            }
            state.node_mut(id)?.info.name = name.to_string();
        }

        self.emitter.emit(NodeEvent::NodeNameUpdated {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_description(&self, id: &NodeId, description: &str) -> Result<()> {
        self.update_info(id, |info| info.description = description.to_string())?;
        self.emitter.emit(NodeEvent::NodeDescriptionUpdated {
            id: id.clone(),
            description: description.to_string(),
        });
        Ok(())
    }

    fn set_metadata(&self, id: &NodeId, metadata: NodeGenericMetadata) -> Result<()> {
        check_metadata(&metadata)?;
        self.update_info(id, |info| info.metadata = metadata.clone())?;
        self.emitter
            .emit(NodeEvent::NodeMetadataUpdated { id: id.clone(), metadata });
        Ok(())
    }

    fn update_modification_time(&self, id: &NodeId) -> Result<()> {
        self.update_info(id, |info| info.modification_time = now_millis())
    }

    fn string_attribute(&self, id: &NodeId, name: &str) -> Result<Option<String>> {
        Ok(self.read().node(id)?.attributes.get(name).cloned())
    }

    fn set_string_attribute(&self, id: &NodeId, name: &str, value: Option<&str>) -> Result<()> {
        let event = {
            let mut state = self.write();
            let attributes = &mut state.node_mut(id)?.attributes;
            match value {
                Some(value) => {
                    attributes.insert(name.to_string(), value.to_string());
                    Some(NodeEvent::AttributeUpdated {
                        id: id.clone(),
                        name: name.to_string(),
                    })
                }
                None => attributes.remove(name).map(|_| NodeEvent::AttributeRemoved {
                    id: id.clone(),
                    name: name.to_string(),
                }),
            }
        };

        if let Some(event) = event {
            self.emitter.emit(event);
        }
        Ok(())
    }

    fn string_attribute_names(&self, id: &NodeId) -> Result<Vec<String>> {
        Ok(self.read().node(id)?.attributes.keys().cloned().collect())
    }

    fn read_binary_data(&self, id: &NodeId, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read().node(id)?.data.get(name).cloned())
    }

    fn write_binary_data(&self, id: &NodeId, name: &str) -> Result<DataWriter<'_>> {
        self.read().node(id)?;
        let id = id.clone();
        let name = name.to_string();
        Ok(DataWriter::new(move |bytes| self.store_data(&id, &name, bytes)))
    }

    fn data_exists(&self, id: &NodeId, name: &str) -> Result<bool> {
        Ok(self.read().node(id)?.data.contains_key(name))
    }

    fn data_names(&self, id: &NodeId) -> Result<Vec<String>> {
        Ok(self.read().node(id)?.data.keys().cloned().collect())
    }

    fn remove_data(&self, id: &NodeId, name: &str) -> Result<bool> {
        let removed = self.write().node_mut(id)?.data.remove(name).is_some();
        if removed {
            self.emitter.emit(NodeEvent::NodeDataRemoved {
                id: id.clone(),
                data_name: name.to_string(),
            });
        }
        Ok(removed)
    }

    #[instrument(skip(self), fields(backend = BACKEND, id = %id, target = %target))]
    fn add_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()> {
        let outcome = {
            let mut state = self.write();
            state.node(id)?;
            state.node(target)?;
            state.dependencies.add(id, name, target)
        };
        self.emitter
            .emit_all(dependency_added_events(id, name, target, outcome));
        Ok(())
    }

    fn dependency(&self, id: &NodeId, name: &str) -> Result<Option<NodeId>> {
        let state = self.read();
        state.node(id)?;
        Ok(state.dependencies.target(id, name).cloned())
    }

    fn dependencies(&self, id: &NodeId) -> Result<Vec<NodeDependency>> {
        let state = self.read();
        state.node(id)?;
        Ok(state
            .dependencies
            .dependencies(id)
            .map(|(name, node)| NodeDependency {
                name: name.to_string(),
                node: node.clone(),
            })
            .collect())
    }

    fn backward_dependencies(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let state = self.read();
        state.node(id)?;
        Ok(state.dependencies.backward(id))
    }

    fn remove_dependency(&self, id: &NodeId, name: &str, target: &NodeId) -> Result<()> {
        let removed = {
            let mut state = self.write();
            state.node(id)?;
            state.dependencies.remove(id, name, target)
        };
        if !removed {
            return Err(StorageError::NotFound(format!(
                "dependency '{}' from {} to {}",
                name, id, target
            )));
        }
        self.emitter
            .emit_all(dependency_removed_events(id, name, target));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    use afs_core::StorageEvent;

    fn recorded(storage: &HeapStorage) -> Arc<Mutex<Vec<NodeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        storage
            .events_bus()
            .add_listener(move |e: &StorageEvent| sink.lock().unwrap().push(e.event.clone()));
        events
    }

    #[test]
    fn test_root_is_folder_named_after_file_system() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        let info = storage.node_info(&root).unwrap();
        assert_eq!(info.name, "mem");
        assert!(info.pseudo_class.is_folder());
        assert_eq!(storage.parent_node(&root).unwrap(), None);
    }

    #[test]
    fn test_from_string_rejects_paths() {
        let storage = HeapStorage::new("mem");
        let err = storage.from_string("/tmp/x").unwrap_err();
        assert!(matches!(err, StorageError::InvalidReference { .. }));
    }

    #[test]
    fn test_create_emits_before_later_updates() {
        let storage = HeapStorage::new("mem");
        let events = recorded(&storage);
        let root = storage.root_node();

        let node = storage.create_node(&root, NewNode::new("n", "data")).unwrap();
        storage.set_description(&node, "hello").unwrap();
        storage.set_string_attribute(&node, "k", Some("v")).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                NodeEvent::NodeCreated {
                    id: node.clone(),
                    parent: root
                },
                NodeEvent::NodeDescriptionUpdated {
                    id: node.clone(),
                    description: "hello".to_string()
                },
                NodeEvent::AttributeUpdated {
                    id: node,
                    name: "k".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_removing_missing_attribute_emits_nothing() {
        let storage = HeapStorage::new("mem");
        let events = recorded(&storage);
        let root = storage.root_node();

        storage.set_string_attribute(&root, "missing", None).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_emits_nothing() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        storage.create_node(&root, NewNode::folder("a")).unwrap();
        let events = recorded(&storage);

        assert!(storage
            .create_node(&root, NewNode::folder("a"))
            .unwrap_err()
            .is_already_exists());
        assert!(storage
            .create_node(&root, NewNode::folder(""))
            .is_err());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_move_into_own_subtree_is_rejected() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        let a = storage.create_node(&root, NewNode::folder("a")).unwrap();
        let b = storage.create_node(&a, NewNode::folder("b")).unwrap();

        assert!(matches!(
            storage.set_parent_node(&a, &b),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            storage.set_parent_node(&a, &a),
            Err(StorageError::InvalidOperation(_))
        ));
        assert!(matches!(
            storage.set_parent_node(&root, &a),
            Err(StorageError::InvalidOperation(_))
        ));
        // Same parent is a no-op
        storage.set_parent_node(&b, &a).unwrap();
        assert_eq!(storage.child_nodes(&a).unwrap(), vec![b]);
    }

    #[test]
    fn test_rename_keeps_child_order() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        let a = storage.create_node(&root, NewNode::folder("a")).unwrap();
        let b = storage.create_node(&root, NewNode::folder("b")).unwrap();

        storage.rename_node(&a, "z").unwrap();
        assert_eq!(storage.child_nodes(&root).unwrap(), vec![a.clone(), b.clone()]);
        assert_eq!(storage.child_node(&root, "z").unwrap(), Some(a.clone()));
        assert_eq!(storage.child_node(&root, "a").unwrap(), None);
        assert!(storage.rename_node(&a, "b").unwrap_err().is_already_exists());
        assert!(storage.rename_node(&root, "other").is_err());
    }

    #[test]
    fn test_data_written_after_node_deleted_fails_on_close() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        let node = storage.create_node(&root, NewNode::new("n", "data")).unwrap();

        let mut writer = storage.write_binary_data(&node, "blob").unwrap();
        writer.write_all(b"bytes").unwrap();
        storage.delete_node(&node).unwrap();
        assert!(writer.close().unwrap_err().is_not_found());
    }

    #[test]
    fn test_replaced_dependency_events() {
        let storage = HeapStorage::new("mem");
        let root = storage.root_node();
        let a = storage.create_node(&root, NewNode::new("a", "data")).unwrap();
        let b = storage.create_node(&root, NewNode::new("b", "data")).unwrap();
        let c = storage.create_node(&root, NewNode::new("c", "data")).unwrap();
        storage.add_dependency(&a, "link", &b).unwrap();

        let events = recorded(&storage);
        storage.add_dependency(&a, "link", &b).unwrap();
        assert!(events.lock().unwrap().is_empty());

        storage.add_dependency(&a, "link", &c).unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                NodeEvent::BackwardDependencyRemoved {
                    id: b.clone(),
                    name: "link".to_string()
                },
                NodeEvent::DependencyAdded {
                    id: a.clone(),
                    name: "link".to_string()
                },
                NodeEvent::BackwardDependencyAdded {
                    id: c.clone(),
                    name: "link".to_string()
                },
            ]
        );
        assert!(storage.backward_dependencies(&b).unwrap().is_empty());
        assert!(storage.dependencies_consistent());
    }
}
