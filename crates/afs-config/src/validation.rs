use crate::types::{AfsConfig, DriveConfig};
use crate::ConfigError;

/// Characters reserved by node paths of the form `drive:/a/b`.
const RESERVED_NAME_CHARS: &[char] = &[':', '/'];

impl AfsConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for (name, drive) in &self.drives {
            if name.trim().is_empty() {
                errors.push(ConfigError::InvalidDriveName(
                    name.clone(),
                    "Drive name must not be empty".to_string(),
                ));
            } else if name.contains(RESERVED_NAME_CHARS) {
                errors.push(ConfigError::InvalidDriveName(
                    name.clone(),
                    "Drive name must not contain ':' or '/'".to_string(),
                ));
            }

            match drive {
                DriveConfig::Heap(_) => {}
                DriveConfig::Mmap(mmap) => {
                    if mmap.path.trim().is_empty() {
                        errors.push(ConfigError::InvalidDrive(
                            name.clone(),
                            "mmap drive requires a non-empty 'path'".to_string(),
                        ));
                    }
                    if mmap.mmap_size.is_some_and(|s| s.as_bytes() == 0) {
                        errors.push(ConfigError::InvalidDrive(
                            name.clone(),
                            "'mmap_size' must be greater than zero".to_string(),
                        ));
                    }
                }
                DriveConfig::Local(local) => {
                    if local.root.trim().is_empty() {
                        errors.push(ConfigError::InvalidDrive(
                            name.clone(),
                            "local drive requires a non-empty 'root'".to_string(),
                        ));
                    }
                }
            }
        }

        // Two persistent drives on the same file would fight over it
        let mmap_paths: Vec<(&String, &str)> = self
            .drives
            .iter()
            .filter_map(|(name, d)| match d {
                DriveConfig::Mmap(m) => Some((name, m.path.as_str())),
                _ => None,
            })
            .collect();
        for (i, (name_a, path_a)) in mmap_paths.iter().enumerate() {
            for (name_b, path_b) in mmap_paths.iter().skip(i + 1) {
                if path_a == path_b {
                    errors.push(ConfigError::InvalidConfig(format!(
                        "Drives '{}' and '{}' share the database file '{}'",
                        name_a, name_b, path_a
                    )));
                }
            }
        }

        if let Some(events) = &self.events {
            if events.capacity == 0 {
                errors.push(ConfigError::InvalidConfig(
                    "events.capacity must be greater than zero".to_string(),
                ));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventsConfig, HeapDriveConfig, HumanBytes, LocalDriveConfig, MmapDriveConfig};

    fn mmap(path: &str) -> DriveConfig {
        DriveConfig::Mmap(MmapDriveConfig {
            path: path.to_string(),
            mmap_size: None,
            remotely_accessible: false,
        })
    }

    #[test]
    fn test_valid_config() {
        let config = AfsConfig {
            drives: indexmap::indexmap! {
                "scratch".to_string() => DriveConfig::Heap(HeapDriveConfig::default()),
                "main".to_string() => mmap("/tmp/main.db"),
            },
            ..Default::default()
        };
        assert!(config.validate().is_empty());
        assert!(config.validate_or_err().is_ok());
    }

    #[test]
    fn test_reserved_drive_name() {
        let config = AfsConfig {
            drives: indexmap::indexmap! {
                "bad:name".to_string() => DriveConfig::Heap(HeapDriveConfig::default()),
            },
            ..Default::default()
        };
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidDriveName(_, _))));
    }

    #[test]
    fn test_empty_mmap_path_and_zero_size() {
        let config = AfsConfig {
            drives: indexmap::indexmap! {
                "main".to_string() => DriveConfig::Mmap(MmapDriveConfig {
                    path: " ".to_string(),
                    mmap_size: Some(HumanBytes(0)),
                    remotely_accessible: false,
                }),
            },
            ..Default::default()
        };
        let errors = config.validate();
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ConfigError::InvalidDrive(_, _)))
                .count(),
            2
        );
    }

    #[test]
    fn test_empty_local_root() {
        let config = AfsConfig {
            drives: indexmap::indexmap! {
                "cases".to_string() => DriveConfig::Local(LocalDriveConfig {
                    root: String::new(),
                    remotely_accessible: false,
                }),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate_or_err(),
            Err(ConfigError::InvalidDrive(_, _))
        ));
    }

    #[test]
    fn test_shared_database_file() {
        let config = AfsConfig {
            drives: indexmap::indexmap! {
                "a".to_string() => mmap("/tmp/shared.db"),
                "b".to_string() => mmap("/tmp/shared.db"),
            },
            ..Default::default()
        };
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_event_capacity() {
        let config = AfsConfig {
            events: Some(EventsConfig { capacity: 0 }),
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 1);
    }
}
