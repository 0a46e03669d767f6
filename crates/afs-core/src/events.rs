//! Change notifications published by storages.
//!
//! Every mutating storage call publishes one or more [`NodeEvent`]s after its
//! state change is applied. Delivery is two-fold: registered listeners are
//! called synchronously on the mutating thread, and every event is also sent
//! on a bounded broadcast channel for receivers that prefer to poll or await.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::id::NodeId;
use crate::node::NodeGenericMetadata;

/// Change applied to a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    NodeCreated { id: NodeId, parent: NodeId },
    NodeRemoved { id: NodeId, parent: NodeId },
    NodeNameUpdated { id: NodeId, name: String },
    NodeDescriptionUpdated { id: NodeId, description: String },
    NodeMetadataUpdated { id: NodeId, metadata: NodeGenericMetadata },
    ParentChanged { id: NodeId, old_parent: NodeId, new_parent: NodeId },
    NodeDataUpdated { id: NodeId, data_name: String },
    NodeDataRemoved { id: NodeId, data_name: String },
    AttributeUpdated { id: NodeId, name: String },
    AttributeRemoved { id: NodeId, name: String },
    DependencyAdded { id: NodeId, name: String },
    DependencyRemoved { id: NodeId, name: String },
    /// Published on the target of a new edge.
    BackwardDependencyAdded { id: NodeId, name: String },
    /// Published on the target of a removed or replaced edge.
    BackwardDependencyRemoved { id: NodeId, name: String },
}

impl NodeEvent {
    /// The node the event is about.
    pub fn node_id(&self) -> &NodeId {
        match self {
            NodeEvent::NodeCreated { id, .. }
            | NodeEvent::NodeRemoved { id, .. }
            | NodeEvent::NodeNameUpdated { id, .. }
            | NodeEvent::NodeDescriptionUpdated { id, .. }
            | NodeEvent::NodeMetadataUpdated { id, .. }
            | NodeEvent::ParentChanged { id, .. }
            | NodeEvent::NodeDataUpdated { id, .. }
            | NodeEvent::NodeDataRemoved { id, .. }
            | NodeEvent::AttributeUpdated { id, .. }
            | NodeEvent::AttributeRemoved { id, .. }
            | NodeEvent::DependencyAdded { id, .. }
            | NodeEvent::DependencyRemoved { id, .. }
            | NodeEvent::BackwardDependencyAdded { id, .. }
            | NodeEvent::BackwardDependencyRemoved { id, .. } => id,
        }
    }
}

/// A node event tagged with the file system it happened in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageEvent {
    pub file_system: String,
    #[serde(flatten)]
    pub event: NodeEvent,
}

impl StorageEvent {
    pub fn new(file_system: impl Into<String>, event: NodeEvent) -> Self {
        StorageEvent {
            file_system: file_system.into(),
            event,
        }
    }
}

/// Error a listener may report; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Synchronous event consumer.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StorageEvent) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&StorageEvent) + Send + Sync,
{
    fn on_event(&self, event: &StorageEvent) -> Result<(), ListenerError> {
        self(event);
        Ok(())
    }
}

/// Handle returned by [`EventsBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// In-process fan-out of storage events.
pub struct EventsBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_listener_id: AtomicU64,
    sender: broadcast::Sender<StorageEvent>,
}

impl EventsBus {
    /// Events buffered per broadcast receiver before it starts lagging.
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventsBus {
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            sender,
        }
    }

    /// Register a listener called on the publishing thread for every event.
    pub fn add_listener(&self, listener: impl EventListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Receive all future events. A receiver that falls more than the
    /// channel capacity behind skips the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver an event to every listener and subscriber.
    pub fn publish(&self, event: StorageEvent) {
        // Snapshot so listeners may (un)register from inside a callback
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = id.0, error = %e, "event listener failed");
                }
                Err(_) => {
                    warn!(listener = id.0, "event listener panicked");
                }
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = StorageEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventsBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
