use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{NodeId, PseudoClass};

/// Free-form typed key/value bag attached to every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeGenericMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    strings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    doubles: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    ints: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    booleans: BTreeMap<String, bool>,
}

impl NodeGenericMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(name.into(), value.into());
        self
    }

    pub fn set_double(mut self, name: impl Into<String>, value: f64) -> Self {
        self.doubles.insert(name.into(), value);
        self
    }

    pub fn set_int(mut self, name: impl Into<String>, value: i64) -> Self {
        self.ints.insert(name.into(), value);
        self
    }

    pub fn set_boolean(mut self, name: impl Into<String>, value: bool) -> Self {
        self.booleans.insert(name.into(), value);
        self
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    pub fn double(&self, name: &str) -> Option<f64> {
        self.doubles.get(name).copied()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.booleans.get(name).copied()
    }

    pub fn strings(&self) -> &BTreeMap<String, String> {
        &self.strings
    }

    pub fn doubles(&self) -> &BTreeMap<String, f64> {
        &self.doubles
    }

    pub fn ints(&self) -> &BTreeMap<String, i64> {
        &self.ints
    }

    pub fn booleans(&self) -> &BTreeMap<String, bool> {
        &self.booleans
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
            && self.doubles.is_empty()
            && self.ints.is_empty()
            && self.booleans.is_empty()
    }
}

/// Everything a storage knows about a node, apart from its links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub pseudo_class: PseudoClass,
    pub description: String,
    pub version: i32,
    pub creation_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    pub metadata: NodeGenericMetadata,
}

/// Parameters of a node about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub name: String,
    pub pseudo_class: PseudoClass,
    pub description: String,
    pub version: i32,
    pub metadata: NodeGenericMetadata,
}

impl NewNode {
    pub fn new(name: impl Into<String>, pseudo_class: impl Into<PseudoClass>) -> Self {
        NewNode {
            name: name.into(),
            pseudo_class: pseudo_class.into(),
            description: String::new(),
            version: 0,
            metadata: NodeGenericMetadata::default(),
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        NewNode::new(name, PseudoClass::folder())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn with_metadata(mut self, metadata: NodeGenericMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build the stored record for this node, stamped with the current time.
    pub fn into_info(self, id: NodeId) -> NodeInfo {
        let now = now_millis();
        NodeInfo {
            id,
            name: self.name,
            pseudo_class: self.pseudo_class,
            description: self.description,
            version: self.version,
            creation_time: now,
            modification_time: now,
            metadata: self.metadata,
        }
    }
}

/// A named outgoing edge as seen from its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDependency {
    pub name: String,
    pub node: NodeId,
}

/// Current time truncated to milliseconds, the resolution every backend stores.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
