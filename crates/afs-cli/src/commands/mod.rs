pub mod archive;
pub mod attr;
pub mod config;
pub mod deps;
pub mod drives;
pub mod info;
pub mod ls;
pub mod tree;

use afs::AppFileSystem;
use afs_core::{NodeId, NodeInfo};

/// One listing line: type marker, pseudo-class and name.
pub(crate) fn describe(info: &NodeInfo) -> String {
    let marker = if info.pseudo_class.is_folder() { "d" } else { "-" };
    format!("{} {:<16} {}", marker, info.pseudo_class.as_str(), info.name)
}

/// `drive:/path` form of a node, falling back to its raw id.
pub(crate) fn display_path(file_system: &AppFileSystem, id: &NodeId) -> String {
    match file_system.path_of(id) {
        Ok(path) => format!("{}:{}", file_system.name(), path),
        Err(_) => id.to_string(),
    }
}
