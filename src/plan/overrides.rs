//! Hand-tuned memory maps for known configurations.
//!
//! For large, frequently-deployed models, partitions tuned by trial runs are
//! more reliable than any closed-form estimate. Operators codify that
//! knowledge here: the table is keyed by the exact
//! (model, device count, capacity class, precision) combination a partition
//! was validated on, and a hit bypasses estimation entirely.
//!
//! The table is data, not branching logic; new entries come from the
//! built-ins below or from a JSON file merged at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::plan::memory_map::{Budget, DeviceMemoryMap, MemoryMapError};
use crate::plan::precision::Precision;

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("override file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("override file malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("override entry for {model} budgets {got} devices but its key says {expected}")]
    DeviceMismatch {
        model: String,
        expected: usize,
        got: usize,
    },

    #[error("override entry for {model}: {source}")]
    BadMap {
        model: String,
        #[source]
        source: MemoryMapError,
    },
}

/// Discrete per-device capacity tier.
///
/// Hardware comes in a handful of SKUs; a device belongs to the largest
/// class whose floor its total capacity clears. The floor sits one GiB under
/// the nominal size because devices report slightly less than the marketing
/// figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityClass {
    Gib16,
    Gib24,
    Gib40,
    Gib80,
}

impl CapacityClass {
    /// Minimum total capacity, in bytes, for a device to qualify.
    pub fn floor_bytes(&self) -> u64 {
        match self {
            CapacityClass::Gib16 => 15 << 30,
            CapacityClass::Gib24 => 23 << 30,
            CapacityClass::Gib40 => 39 << 30,
            CapacityClass::Gib80 => 79 << 30,
        }
    }

    /// The class a probed total capacity falls into, if any.
    pub fn classify(total_bytes: u64) -> Option<CapacityClass> {
        [
            CapacityClass::Gib80,
            CapacityClass::Gib40,
            CapacityClass::Gib24,
            CapacityClass::Gib16,
        ]
        .into_iter()
        .find(|class| total_bytes > class.floor_bytes())
    }
}

impl std::fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityClass::Gib16 => write!(f, "16GiB-class"),
            CapacityClass::Gib24 => write!(f, "24GiB-class"),
            CapacityClass::Gib40 => write!(f, "40GiB-class"),
            CapacityClass::Gib80 => write!(f, "80GiB-class"),
        }
    }
}

/// The combination a hand-tuned partition was validated on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverrideKey {
    pub model_id: String,
    pub device_count: usize,
    pub capacity_class: CapacityClass,
    pub precision: Precision,
}

/// On-disk spelling of one override entry.
#[derive(Debug, Serialize, Deserialize)]
struct OverrideEntry {
    model_id: String,
    device_count: usize,
    capacity_class: CapacityClass,
    precision: Precision,
    budgets: DeviceMemoryMap,
}

impl OverrideEntry {
    fn into_parts(self) -> (OverrideKey, DeviceMemoryMap) {
        (
            OverrideKey {
                model_id: self.model_id,
                device_count: self.device_count,
                capacity_class: self.capacity_class,
                precision: self.precision,
            },
            self.budgets,
        )
    }
}

/// Immutable lookup of hand-tuned memory maps.
pub struct OverrideTable {
    entries: HashMap<OverrideKey, DeviceMemoryMap>,
}

impl OverrideTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Entries shipped with the planner.
    ///
    /// BLOOM-176B on an 8x80GiB node, tuned by trial runs: device 0 is kept
    /// free for coordination overhead and the remaining seven devices share
    /// the weights evenly. Works at batch size 40.
    pub fn builtin() -> Self {
        let mut table = Self::empty();

        for precision in [Precision::Float16, Precision::BFloat16] {
            table.insert(
                OverrideKey {
                    model_id: "bigscience/bloom".to_string(),
                    device_count: 8,
                    capacity_class: CapacityClass::Gib80,
                    precision,
                },
                DeviceMemoryMap::reserved_head(
                    8,
                    Budget::Capacity("0GiB".to_string()),
                    Budget::Capacity("51GiB".to_string()),
                ),
            );
        }

        table.insert(
            OverrideKey {
                model_id: "bigscience/bloom".to_string(),
                device_count: 8,
                capacity_class: CapacityClass::Gib80,
                precision: Precision::Int8,
            },
            DeviceMemoryMap::reserved_head(
                8,
                Budget::Capacity("0GiB".to_string()),
                Budget::Capacity("26GiB".to_string()),
            ),
        );

        table
    }

    pub fn insert(&mut self, key: OverrideKey, map: DeviceMemoryMap) {
        self.entries.insert(key, map);
    }

    /// Merge operator-supplied entries from a JSON file over the current
    /// table. Returns how many entries were added or replaced.
    pub fn merge_file(&mut self, path: &Path) -> Result<usize, OverrideError> {
        let data = std::fs::read_to_string(path)?;
        let entries: Vec<OverrideEntry> = serde_json::from_str(&data)?;
        let count = entries.len();

        for entry in entries {
            let (key, budgets) = entry.into_parts();
            budgets
                .ensure_contiguous()
                .map_err(|source| OverrideError::BadMap {
                    model: key.model_id.clone(),
                    source,
                })?;
            if budgets.device_count() != key.device_count {
                return Err(OverrideError::DeviceMismatch {
                    model: key.model_id,
                    expected: key.device_count,
                    got: budgets.device_count(),
                });
            }
            debug!(
                model = %key.model_id,
                devices = key.device_count,
                precision = %key.precision,
                "Merged override entry"
            );
            self.entries.insert(key, budgets);
        }

        Ok(count)
    }

    pub fn lookup(&self, key: &OverrideKey) -> Option<&DeviceMemoryMap> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(CapacityClass::classify(80 << 30), Some(CapacityClass::Gib80));
        // Exactly at the floor does not qualify.
        assert_eq!(CapacityClass::classify(79 << 30), Some(CapacityClass::Gib40));
        assert_eq!(CapacityClass::classify(40 << 30), Some(CapacityClass::Gib40));
        assert_eq!(CapacityClass::classify(24 << 30), Some(CapacityClass::Gib24));
        assert_eq!(CapacityClass::classify(16 << 30), Some(CapacityClass::Gib16));
        assert_eq!(CapacityClass::classify(8 << 30), None);
    }

    #[test]
    fn test_builtin_bloom_entries() {
        let table = OverrideTable::builtin();
        assert_eq!(table.len(), 3);

        let map = table
            .lookup(&OverrideKey {
                model_id: "bigscience/bloom".to_string(),
                device_count: 8,
                capacity_class: CapacityClass::Gib80,
                precision: Precision::BFloat16,
            })
            .unwrap();
        assert_eq!(map.get(0).unwrap().as_bytes().unwrap(), 0);
        assert_eq!(map.get(7).unwrap().as_bytes().unwrap(), 51 << 30);

        let int8 = table
            .lookup(&OverrideKey {
                model_id: "bigscience/bloom".to_string(),
                device_count: 8,
                capacity_class: CapacityClass::Gib80,
                precision: Precision::Int8,
            })
            .unwrap();
        assert_eq!(int8.get(1).unwrap().as_bytes().unwrap(), 26 << 30);
    }

    #[test]
    fn test_no_entry_for_other_topology() {
        let table = OverrideTable::builtin();
        assert!(table
            .lookup(&OverrideKey {
                model_id: "bigscience/bloom".to_string(),
                device_count: 4,
                capacity_class: CapacityClass::Gib80,
                precision: Precision::Float16,
            })
            .is_none());
    }

    #[test]
    fn test_merge_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "model_id": "acme/mega-13b",
                "device_count": 2,
                "capacity_class": "gib24",
                "precision": "float16",
                "budgets": {{"0": "4GiB", "1": "20GiB"}}
            }}]"#
        )
        .unwrap();

        let mut table = OverrideTable::empty();
        let added = table.merge_file(file.path()).unwrap();
        assert_eq!(added, 1);

        let map = table
            .lookup(&OverrideKey {
                model_id: "acme/mega-13b".to_string(),
                device_count: 2,
                capacity_class: CapacityClass::Gib24,
                precision: Precision::Float16,
            })
            .unwrap();
        assert_eq!(map.get(1).unwrap().as_bytes().unwrap(), 20 << 30);
    }

    #[test]
    fn test_merge_rejects_device_mismatch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "model_id": "acme/mega-13b",
                "device_count": 4,
                "capacity_class": "gib24",
                "precision": "float16",
                "budgets": {{"0": "4GiB", "1": "20GiB"}}
            }}]"#
        )
        .unwrap();

        let mut table = OverrideTable::empty();
        assert!(matches!(
            table.merge_file(file.path()),
            Err(OverrideError::DeviceMismatch { expected: 4, got: 2, .. })
        ));
    }
}
