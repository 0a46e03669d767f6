//! Application file system: named drives over pluggable storages.
//!
//! ```no_run
//! use afs::AppData;
//! use afs_config::AfsConfig;
//!
//! let config = AfsConfig::from_file("afs.yaml".as_ref())?;
//! let app_data = AppData::from_config(&config, &[])?;
//! let node = app_data.node("main:/projects/study")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod app_data;
mod error;
mod file_system;

pub use app_data::AppData;
pub use error::AfsError;
pub use file_system::AppFileSystem;
