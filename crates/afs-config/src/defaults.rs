use crate::types::{AfsConfig, DriveConfig, EventsConfig, HumanBytes};

/// Memory-map window used when neither the drive nor `defaults` sets one.
pub const DEFAULT_MMAP_SIZE: HumanBytes = HumanBytes(64 * 1024 * 1024);

/// Name given to the configuration when none is set.
pub const DEFAULT_NAME: &str = "afs";

impl AfsConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        if self.name.is_none() {
            self.name = Some(DEFAULT_NAME.to_string());
        }

        if self.events.is_none() {
            self.events = Some(EventsConfig::default());
        }

        let mmap_size = self
            .defaults
            .as_ref()
            .and_then(|d| d.mmap_size)
            .unwrap_or(DEFAULT_MMAP_SIZE);

        for drive in self.drives.values_mut() {
            if let DriveConfig::Mmap(mmap) = drive {
                if mmap.mmap_size.is_none() {
                    mmap.mmap_size = Some(mmap_size);
                }
            }
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> AfsConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}
