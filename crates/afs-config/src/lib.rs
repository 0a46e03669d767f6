mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::{DEFAULT_MMAP_SIZE, DEFAULT_NAME};
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid drive name '{0}': {1}")]
    InvalidDriveName(String, String),

    #[error("Invalid drive '{0}': {1}")]
    InvalidDrive(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AfsConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: AfsConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize back to YAML, e.g. to show the effective configuration.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: platform
drives:
  scratch:
    type: heap
"#;

        let config = AfsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("platform".to_string()));
        assert_eq!(config.drives.len(), 1);
        assert_eq!(config.drives["scratch"].kind(), "heap");
        assert!(!config.drives["scratch"].remotely_accessible());
    }

    #[test]
    fn test_parse_all_drive_kinds_in_order() {
        let yaml = r#"
events:
  capacity: 16
drives:
  main:
    type: mmap
    path: /var/lib/afs/main.db
    mmap_size: 256mb
    remotely_accessible: true
  cases:
    type: local
    root: /data/cases
  scratch:
    type: heap
"#;

        let config = AfsConfig::from_yaml(yaml).unwrap();
        let names: Vec<_> = config.drives.keys().cloned().collect();
        assert_eq!(names, vec!["main", "cases", "scratch"]);
        assert_eq!(config.events_capacity(), 16);

        match &config.drives["main"] {
            DriveConfig::Mmap(m) => {
                assert_eq!(m.path, "/var/lib/afs/main.db");
                assert_eq!(m.mmap_size, Some(HumanBytes(256 * 1024 * 1024)));
                assert!(m.remotely_accessible);
            }
            other => panic!("Expected mmap drive, got {:?}", other),
        }
        match &config.drives["cases"] {
            DriveConfig::Local(l) => assert_eq!(l.root, "/data/cases"),
            other => panic!("Expected local drive, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("AFS_LIB_TEST_ROOT", "/tmp/afs-cases");

        let yaml = r#"
drives:
  cases:
    type: local
    root: ${AFS_LIB_TEST_ROOT}
"#;

        let config = AfsConfig::from_yaml(yaml).unwrap();
        match &config.drives["cases"] {
            DriveConfig::Local(local) => assert_eq!(local.root, "/tmp/afs-cases"),
            _ => panic!("Expected local drive"),
        }
    }

    #[test]
    fn test_unknown_drive_type() {
        let yaml = r#"
drives:
  remote:
    type: s3
"#;
        assert!(matches!(
            AfsConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afs.yaml");
        std::fs::write(&path, "drives:\n  scratch:\n    type: heap\n").unwrap();

        let config = AfsConfig::from_file(&path).unwrap();
        assert!(config.drives.contains_key("scratch"));

        let missing = AfsConfig::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_effective_config_round_trips_through_yaml() {
        let yaml = r#"
drives:
  main:
    type: mmap
    path: /tmp/main.db
"#;
        let effective = AfsConfig::from_yaml(yaml).unwrap().effective();
        let reparsed = AfsConfig::from_yaml(&effective.to_yaml().unwrap()).unwrap();
        match &reparsed.drives["main"] {
            DriveConfig::Mmap(m) => assert_eq!(m.mmap_size, Some(DEFAULT_MMAP_SIZE)),
            _ => panic!("Expected mmap drive"),
        }
    }
}
