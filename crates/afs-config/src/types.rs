use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Human-readable bytes (e.g., "64mb", "2gb").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HumanBytes(pub u64);

impl HumanBytes {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for HumanBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if let Some(n) = s.strip_suffix("tb") {
            (n, 1024u64 * 1024 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("gb") {
            (n, 1024u64 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("mb") {
            (n, 1024u64 * 1024)
        } else if let Some(n) = s.strip_suffix("kb") {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix('b') {
            (n, 1u64)
        } else {
            // Assume bytes if no unit
            (s.as_str(), 1u64)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in bytes: {}", s))?;

        num.checked_mul(multiplier)
            .map(HumanBytes)
            .ok_or_else(|| format!("Byte size overflows: {}", s))
    }
}

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;
        const TB: u64 = GB * 1024;

        let bytes = self.0;
        // Only use a unit when it is exact, so the value survives a round trip.
        if bytes >= TB && bytes % TB == 0 {
            write!(f, "{}tb", bytes / TB)
        } else if bytes >= GB && bytes % GB == 0 {
            write!(f, "{}gb", bytes / GB)
        } else if bytes >= MB && bytes % MB == 0 {
            write!(f, "{}mb", bytes / MB)
        } else if bytes >= KB && bytes % KB == 0 {
            write!(f, "{}kb", bytes / KB)
        } else {
            write!(f, "{}b", bytes)
        }
    }
}

impl Serialize for HumanBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanBytes::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// In-heap drive; contents vanish when the process exits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeapDriveConfig {
    #[serde(default)]
    pub remotely_accessible: bool,
}

/// Persistent drive stored in a single memory-mapped database file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmapDriveConfig {
    pub path: String,
    #[serde(default)]
    pub mmap_size: Option<HumanBytes>,
    #[serde(default)]
    pub remotely_accessible: bool,
}

/// Read-only drive exposing a directory of the local filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDriveConfig {
    pub root: String,
    #[serde(default)]
    pub remotely_accessible: bool,
}

/// Tagged enum for drive configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveConfig {
    Heap(HeapDriveConfig),
    Mmap(MmapDriveConfig),
    Local(LocalDriveConfig),
}

impl DriveConfig {
    /// Backend kind as written in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveConfig::Heap(_) => "heap",
            DriveConfig::Mmap(_) => "mmap",
            DriveConfig::Local(_) => "local",
        }
    }

    pub fn remotely_accessible(&self) -> bool {
        match self {
            DriveConfig::Heap(c) => c.remotely_accessible,
            DriveConfig::Mmap(c) => c.remotely_accessible,
            DriveConfig::Local(c) => c.remotely_accessible,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Number of events buffered per broadcast receiver before it lags.
    #[serde(default = "default_events_capacity")]
    pub capacity: usize,
}

pub(crate) fn default_events_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            capacity: default_events_capacity(),
        }
    }
}

/// Global defaults applied to drives that leave a setting unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub mmap_size: Option<HumanBytes>,
}

/// Top-level application file system configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AfsConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub events: Option<EventsConfig>,
    #[serde(default)]
    pub drives: IndexMap<String, DriveConfig>,
    #[serde(default)]
    pub defaults: Option<DefaultsConfig>,
}

impl AfsConfig {
    /// Event bus capacity, falling back to the default when unset.
    pub fn events_capacity(&self) -> usize {
        self.events
            .as_ref()
            .map(|e| e.capacity)
            .unwrap_or_else(default_events_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes_parsing() {
        assert_eq!(HumanBytes::from_str("512b").unwrap().as_bytes(), 512);
        assert_eq!(HumanBytes::from_str("1kb").unwrap().as_bytes(), 1024);
        assert_eq!(HumanBytes::from_str("4096").unwrap().as_bytes(), 4096);
        assert_eq!(
            HumanBytes::from_str("64MB").unwrap().as_bytes(),
            64 * 1024 * 1024
        );
        assert_eq!(
            HumanBytes::from_str("2gb").unwrap().as_bytes(),
            2 * 1024 * 1024 * 1024
        );
    }

    #[test]
    fn test_human_bytes_rejects_garbage() {
        assert!(HumanBytes::from_str("lots").is_err());
        assert!(HumanBytes::from_str("99999999999tb").is_err());
    }

    #[test]
    fn test_human_bytes_display_keeps_exact_value() {
        assert_eq!(HumanBytes(64 * 1024 * 1024).to_string(), "64mb");
        assert_eq!(HumanBytes(1536).to_string(), "1536b");
        assert_eq!(HumanBytes(0).to_string(), "0b");
    }

    #[test]
    fn test_drive_kind_and_flags() {
        let drive = DriveConfig::Local(LocalDriveConfig {
            root: "/data".to_string(),
            remotely_accessible: true,
        });
        assert_eq!(drive.kind(), "local");
        assert!(drive.remotely_accessible());
        assert!(!DriveConfig::Heap(HeapDriveConfig::default()).remotely_accessible());
    }
}
