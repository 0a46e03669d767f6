use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Identity of a node inside one storage.
///
/// Ids are only meaningful to the storage that issued them. The string form
/// produced by `Display` is the canonical encoding and is accepted back by
/// that storage's `from_string`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Repr);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Repr {
    Uuid(Uuid),
    Path(PathBuf),
}

impl NodeId {
    /// A fresh random id.
    pub fn new_uuid() -> Self {
        NodeId(Repr::Uuid(Uuid::new_v4()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        NodeId(Repr::Uuid(uuid))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        NodeId(Repr::Path(path.into()))
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match &self.0 {
            Repr::Uuid(uuid) => Some(uuid),
            Repr::Path(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match &self.0 {
            Repr::Path(path) => Some(path),
            Repr::Uuid(_) => None,
        }
    }

    /// Parse either encoding: a UUID when the string is one, a path otherwise.
    ///
    /// Storages validate ids through their own `from_string`; this is only
    /// for storage-independent data such as serialized events.
    pub fn parse_any(s: &str) -> Self {
        match Uuid::parse_str(s) {
            Ok(uuid) => NodeId::from_uuid(uuid),
            Err(_) => NodeId::from_path(s),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            Repr::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NodeId::parse_any(&s))
    }
}

/// Semantic type tag of a node. Open-ended: any string is a valid class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PseudoClass(String);

impl PseudoClass {
    pub const FOLDER: &'static str = "folder";
    pub const PROJECT: &'static str = "project";
    pub const PROJECT_FOLDER: &'static str = "project-folder";

    pub fn new(class: impl Into<String>) -> Self {
        PseudoClass(class.into())
    }

    pub fn folder() -> Self {
        PseudoClass::new(Self::FOLDER)
    }

    pub fn project() -> Self {
        PseudoClass::new(Self::PROJECT)
    }

    pub fn project_folder() -> Self {
        PseudoClass::new(Self::PROJECT_FOLDER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder-like classes may hold children created by users.
    pub fn is_folder(&self) -> bool {
        self.0 == Self::FOLDER || self.0 == Self::PROJECT_FOLDER
    }
}

impl fmt::Display for PseudoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PseudoClass {
    fn from(s: &str) -> Self {
        PseudoClass::new(s)
    }
}

impl From<String> for PseudoClass {
    fn from(s: String) -> Self {
        PseudoClass(s)
    }
}

impl PartialEq<str> for PseudoClass {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PseudoClass {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_id_display_is_hyphenated() {
        let uuid = Uuid::new_v4();
        let id = NodeId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.hyphenated().to_string());
        assert_eq!(id.as_uuid(), Some(&uuid));
        assert!(id.as_path().is_none());
    }

    #[test]
    fn test_path_id_display() {
        let id = NodeId::from_path("/data/cases/n.tst");
        assert_eq!(id.to_string(), "/data/cases/n.tst");
        assert_eq!(id.as_path(), Some(Path::new("/data/cases/n.tst")));
    }

    #[test]
    fn test_parse_any() {
        let id = NodeId::new_uuid();
        assert_eq!(NodeId::parse_any(&id.to_string()), id);
        assert_eq!(
            NodeId::parse_any("/tmp/x"),
            NodeId::from_path("/tmp/x")
        );
    }

    #[test]
    fn test_serde_uses_string_form() {
        let id = NodeId::new_uuid();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_pseudo_class() {
        assert!(PseudoClass::folder().is_folder());
        assert!(PseudoClass::project_folder().is_folder());
        assert!(!PseudoClass::project().is_folder());
        assert_eq!(PseudoClass::from("case"), "case");
        assert_eq!(PseudoClass::new("case").to_string(), "case");
    }
}
