use std::sync::Arc;

use afs_core::{AddOutcome, EventsBus, NodeEvent, NodeId, Result, StorageError, StorageEvent};
use uuid::Uuid;

/// Parse the string form of a UUID node id.
pub(crate) fn parse_uuid_id(s: &str, backend: &'static str) -> Result<NodeId> {
    Uuid::parse_str(s)
        .map(NodeId::from_uuid)
        .map_err(|_| StorageError::InvalidReference {
            id: s.to_string(),
            backend,
        })
}

/// Publishes node events tagged with the owning file system's name.
pub(crate) struct Emitter {
    file_system: String,
    bus: Arc<EventsBus>,
}

impl Emitter {
    pub(crate) fn new(file_system: &str, bus: Arc<EventsBus>) -> Self {
        Emitter {
            file_system: file_system.to_string(),
            bus,
        }
    }

    pub(crate) fn bus(&self) -> &EventsBus {
        &self.bus
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        self.bus
            .publish(StorageEvent::new(self.file_system.as_str(), event));
    }

    pub(crate) fn emit_all(&self, events: impl IntoIterator<Item = NodeEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Events describing the effect of adding `source --name--> target`.
pub(crate) fn dependency_added_events(
    source: &NodeId,
    name: &str,
    target: &NodeId,
    outcome: AddOutcome<NodeId>,
) -> Vec<NodeEvent> {
    let added = |events: &mut Vec<NodeEvent>| {
        events.push(NodeEvent::DependencyAdded {
            id: source.clone(),
            name: name.to_string(),
        });
        events.push(NodeEvent::BackwardDependencyAdded {
            id: target.clone(),
            name: name.to_string(),
        });
    };

    let mut events = Vec::new();
    match outcome {
        AddOutcome::Unchanged => {}
        AddOutcome::Added => added(&mut events),
        AddOutcome::Replaced(old) => {
            events.push(NodeEvent::BackwardDependencyRemoved {
                id: old,
                name: name.to_string(),
            });
            added(&mut events);
        }
    }
    events
}

pub(crate) fn dependency_removed_events(
    source: &NodeId,
    name: &str,
    target: &NodeId,
) -> [NodeEvent; 2] {
    [
        NodeEvent::DependencyRemoved {
            id: source.clone(),
            name: name.to_string(),
        },
        NodeEvent::BackwardDependencyRemoved {
            id: target.clone(),
            name: name.to_string(),
        },
    ]
}
