//! Storage backends for the application file system.
//!
//! - [`HeapStorage`]: volatile, in-process maps.
//! - [`MmapFileStorage`]: a single memory-mapped database file.
//! - [`LocalStorage`]: read-only view of a local directory.

mod common;
mod heap;
mod local;
mod mmap;
mod scanner;

pub use heap::HeapStorage;
pub use local::LocalStorage;
pub use mmap::{MmapFileStorage, MmapOptions, DEFAULT_MMAP_SIZE};
pub use scanner::{
    DirectoryDataSource, ExtensionScanner, LocalFile, LocalFileScanner, DATA_SOURCE_ATTRIBUTE,
};
