use std::path::Path;
use std::sync::Arc;

use afs_backends::{HeapStorage, LocalFileScanner, LocalStorage, MmapFileStorage, MmapOptions};
use afs_config::{AfsConfig, DriveConfig, DEFAULT_MMAP_SIZE};
use afs_core::{AppFileSystemStorage, EventsBus, NodeId};
use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use crate::error::AfsError;
use crate::file_system::AppFileSystem;

/// The set of drives of one application, sharing a single events bus.
pub struct AppData {
    bus: Arc<EventsBus>,
    file_systems: IndexMap<String, AppFileSystem>,
}

impl AppData {
    pub fn new() -> Self {
        Self::with_events_bus(Arc::new(EventsBus::new()))
    }

    pub fn with_events_bus(bus: Arc<EventsBus>) -> Self {
        AppData {
            bus,
            file_systems: IndexMap::new(),
        }
    }

    /// Build every configured drive. Local drives recognize files with
    /// `scanners`, consulted in order.
    #[instrument(skip_all, fields(name = config.name.as_deref().unwrap_or_default()))]
    pub fn from_config(
        config: &AfsConfig,
        scanners: &[Arc<dyn LocalFileScanner>],
    ) -> Result<Self, AfsError> {
        config.validate_or_err()?;
        let config = config.effective();

        let mut app_data =
            Self::with_events_bus(Arc::new(EventsBus::with_capacity(config.events_capacity())));

        for (name, drive) in &config.drives {
            let storage: Arc<dyn AppFileSystemStorage> = match drive {
                DriveConfig::Heap(_) => {
                    Arc::new(HeapStorage::with_events_bus(name.as_str(), app_data.bus.clone()))
                }
                DriveConfig::Mmap(mmap) => {
                    let options = MmapOptions {
                        mmap_size: mmap.mmap_size.unwrap_or(DEFAULT_MMAP_SIZE).as_bytes(),
                    };
                    Arc::new(MmapFileStorage::open(
                        name.as_str(),
                        Path::new(&mmap.path),
                        options,
                        app_data.bus.clone(),
                    )?)
                }
                DriveConfig::Local(local) => {
                    let scanners = scanners
                        .iter()
                        .map(|scanner| Box::new(scanner.clone()) as Box<dyn LocalFileScanner>)
                        .collect();
                    Arc::new(LocalStorage::new(
                        name.as_str(),
                        &local.root,
                        scanners,
                        app_data.bus.clone(),
                    )?)
                }
            };
            debug!(drive = %name, kind = drive.kind(), "built drive");
            app_data.add_file_system(AppFileSystem::new(storage, drive.remotely_accessible()))?;
        }

        info!(drives = app_data.file_systems.len(), "application data ready");
        Ok(app_data)
    }

    pub fn events_bus(&self) -> &Arc<EventsBus> {
        &self.bus
    }

    /// Register a drive. Its storage should publish on [`events_bus`](Self::events_bus)
    /// for listeners of this registry to see its events.
    pub fn add_file_system(&mut self, file_system: AppFileSystem) -> Result<(), AfsError> {
        let name = file_system.name().to_string();
        if self.file_systems.contains_key(&name) {
            return Err(AfsError::DuplicateFileSystem(name));
        }
        self.file_systems.insert(name, file_system);
        Ok(())
    }

    pub fn file_system(&self, name: &str) -> Option<&AppFileSystem> {
        self.file_systems.get(name)
    }

    /// Drives in registration order.
    pub fn file_systems(&self) -> impl Iterator<Item = &AppFileSystem> {
        self.file_systems.values()
    }

    pub fn file_system_names(&self) -> Vec<&str> {
        self.file_systems.keys().map(String::as_str).collect()
    }

    /// Resolve `drive:/a/b` to a node.
    pub fn node(&self, path: &str) -> Result<NodeId, AfsError> {
        self.resolve(path).map(|(_, node)| node)
    }

    /// Resolve `drive:/a/b` to its drive and node.
    pub fn resolve(&self, path: &str) -> Result<(&AppFileSystem, NodeId), AfsError> {
        let (drive, node_path) = path
            .split_once(':')
            .filter(|(drive, _)| !drive.is_empty())
            .ok_or_else(|| AfsError::InvalidPath(path.to_string()))?;
        let file_system = self
            .file_system(drive)
            .ok_or_else(|| AfsError::UnknownFileSystem(drive.to_string()))?;
        let node = file_system.require_node(node_path)?;
        Ok((file_system, node))
    }

    pub fn remotely_accessible_file_system_names(&self) -> Vec<String> {
        self.file_systems
            .values()
            .filter(|fs| fs.is_remotely_accessible())
            .map(|fs| fs.name().to_string())
            .collect()
    }

    /// Storage of a drive, only if it may be shared remotely.
    pub fn remotely_accessible_storage(&self, name: &str) -> Option<Arc<dyn AppFileSystemStorage>> {
        self.file_system(name)
            .filter(|fs| fs.is_remotely_accessible())
            .map(|fs| fs.storage().clone())
    }

    /// Close every drive and forget them. All drives are attempted; the
    /// first failure is returned.
    pub fn close(&mut self) -> Result<(), AfsError> {
        let mut first_error = None;
        for (name, file_system) in self.file_systems.drain(..) {
            if let Err(e) = file_system.close() {
                warn!(drive = %name, error = %e, "failed to close drive");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Default for AppData {
    fn default() -> Self {
        Self::new()
    }
}
