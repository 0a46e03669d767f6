//! Named directed edges between nodes with a derived backward index.

use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

/// Result of [`DependencyGraph::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome<Id> {
    /// The exact edge already existed.
    Unchanged,
    /// A new slot was filled.
    Added,
    /// The slot pointed at another target, which is returned.
    Replaced(Id),
}

/// An edge `source --name--> target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge<Id> {
    pub source: Id,
    pub name: String,
    pub target: Id,
}

/// Forward index `source -> name -> target`; each name is a single-valued
/// slot per source. The backward index holds exactly one `(source, name)`
/// entry per forward edge and is only ever updated alongside it.
#[derive(Debug, Clone)]
pub struct DependencyGraph<Id> {
    forward: IndexMap<Id, IndexMap<String, Id>>,
    backward: IndexMap<Id, IndexSet<(Id, String)>>,
}

impl<Id: Clone + Eq + Hash> DependencyGraph<Id> {
    pub fn new() -> Self {
        DependencyGraph {
            forward: IndexMap::new(),
            backward: IndexMap::new(),
        }
    }

    /// Point `source`'s `name` slot at `target`, replacing any previous target.
    pub fn add(&mut self, source: &Id, name: &str, target: &Id) -> AddOutcome<Id> {
        let slots = self.forward.entry(source.clone()).or_default();
        let previous = slots.insert(name.to_string(), target.clone());
        match previous {
            Some(old) if old == *target => AddOutcome::Unchanged,
            Some(old) => {
                self.unlink_backward(&old, source, name);
                self.link_backward(target, source, name);
                AddOutcome::Replaced(old)
            }
            None => {
                self.link_backward(target, source, name);
                AddOutcome::Added
            }
        }
    }

    /// Remove the edge if it exists exactly as given.
    pub fn remove(&mut self, source: &Id, name: &str, target: &Id) -> bool {
        let Some(slots) = self.forward.get_mut(source) else {
            return false;
        };
        if slots.get(name) != Some(target) {
            return false;
        }
        slots.shift_remove(name);
        if slots.is_empty() {
            self.forward.shift_remove(source);
        }
        self.unlink_backward(target, source, name);
        true
    }

    pub fn target(&self, source: &Id, name: &str) -> Option<&Id> {
        self.forward.get(source).and_then(|slots| slots.get(name))
    }

    /// Outgoing edges of `source` in insertion order.
    pub fn dependencies<'a>(&'a self, source: &Id) -> impl Iterator<Item = (&'a str, &'a Id)> + 'a {
        self.forward
            .get(source)
            .into_iter()
            .flat_map(|slots| slots.iter().map(|(name, target)| (name.as_str(), target)))
    }

    /// Distinct sources of edges pointing at `target`.
    pub fn backward(&self, target: &Id) -> Vec<Id> {
        let mut sources: IndexSet<Id> = IndexSet::new();
        if let Some(entries) = self.backward.get(target) {
            for (source, _) in entries {
                sources.insert(source.clone());
            }
        }
        sources.into_iter().collect()
    }

    /// Remove every edge touching `node`, returning the removed edges.
    pub fn remove_node(&mut self, node: &Id) -> Vec<Edge<Id>> {
        let mut removed = Vec::new();

        if let Some(slots) = self.forward.shift_remove(node) {
            for (name, target) in slots {
                self.unlink_backward(&target, node, &name);
                removed.push(Edge {
                    source: node.clone(),
                    name,
                    target,
                });
            }
        }

        if let Some(entries) = self.backward.shift_remove(node) {
            for (source, name) in entries {
                if let Some(slots) = self.forward.get_mut(&source) {
                    slots.shift_remove(&name);
                    if slots.is_empty() {
                        self.forward.shift_remove(&source);
                    }
                }
                removed.push(Edge {
                    source,
                    name,
                    target: node.clone(),
                });
            }
        }

        removed
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.forward.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Check that both indexes describe the same edge set.
    pub fn is_consistent(&self) -> bool {
        let backward_len: usize = self.backward.values().map(IndexSet::len).sum();
        if backward_len != self.len() {
            return false;
        }
        self.forward.iter().all(|(source, slots)| {
            slots.iter().all(|(name, target)| {
                self.backward
                    .get(target)
                    .is_some_and(|entries| entries.contains(&(source.clone(), name.clone())))
            })
        })
    }

    fn link_backward(&mut self, target: &Id, source: &Id, name: &str) {
        self.backward
            .entry(target.clone())
            .or_default()
            .insert((source.clone(), name.to_string()));
    }

    fn unlink_backward(&mut self, target: &Id, source: &Id, name: &str) {
        if let Some(entries) = self.backward.get_mut(target) {
            entries.shift_remove(&(source.clone(), name.to_string()));
            if entries.is_empty() {
                self.backward.shift_remove(target);
            }
        }
    }
}

impl<Id: Clone + Eq + Hash> Default for DependencyGraph<Id> {
    fn default() -> Self {
        Self::new()
    }
}
