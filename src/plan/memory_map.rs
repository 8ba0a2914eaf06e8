//! Per-device memory budgets.
//!
//! A [`DeviceMemoryMap`] is the planner's output: one budget per visible
//! device, consumed by the sharding loader to decide layer placement.
//! Budgets are exact byte counts on the estimated path and operator-facing
//! capacity strings (`"51GiB"`) on the hand-tuned path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryMapError {
    #[error("budget map skips device {0}; every device up to the highest index needs an entry")]
    MissingDevice(usize),

    #[error("unparsable capacity string: {0:?}")]
    UnparsableCapacity(String),
}

/// A single device's memory ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Budget {
    /// Exact byte count, produced by the general estimation path.
    Bytes(u64),

    /// Capacity string such as `"51GiB"`, as written in hand-tuned entries.
    Capacity(String),
}

impl Budget {
    /// Resolve the budget to bytes, parsing capacity strings.
    ///
    /// Suffixes `GiB`, `MiB`, `KiB` and bare `B` are accepted, case
    /// insensitively, with an integer magnitude.
    pub fn as_bytes(&self) -> Result<u64, MemoryMapError> {
        match self {
            Budget::Bytes(n) => Ok(*n),
            Budget::Capacity(s) => parse_capacity(s),
        }
    }
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Budget::Bytes(n) => write!(f, "{:.2}GiB", gib(*n)),
            Budget::Capacity(s) => write!(f, "{s}"),
        }
    }
}

/// Bytes expressed in GiB, for log lines.
pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}

fn parse_capacity(s: &str) -> Result<u64, MemoryMapError> {
    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (magnitude, unit): (&str, u64) = if let Some(m) = upper.strip_suffix("GIB") {
        (m, 1 << 30)
    } else if let Some(m) = upper.strip_suffix("MIB") {
        (m, 1 << 20)
    } else if let Some(m) = upper.strip_suffix("KIB") {
        (m, 1 << 10)
    } else if let Some(m) = upper.strip_suffix('B') {
        (m, 1)
    } else {
        return Err(MemoryMapError::UnparsableCapacity(s.to_string()));
    };

    magnitude
        .trim()
        .parse::<u64>()
        .map(|n| n * unit)
        .map_err(|_| MemoryMapError::UnparsableCapacity(s.to_string()))
}

/// Ordered mapping from device index to budget.
///
/// Covers devices `0..N` contiguously, one entry per visible device.
/// Device 0 may carry a zero or reduced budget: in multi-process serving it
/// often hosts interprocess communication overhead, and hand-tuned entries
/// reserve it accordingly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceMemoryMap {
    budgets: BTreeMap<usize, Budget>,
}

impl DeviceMemoryMap {
    /// Identical byte budget on every device, the general-path shape.
    pub fn uniform(device_count: usize, bytes_per_device: u64) -> Self {
        Self {
            budgets: (0..device_count)
                .map(|i| (i, Budget::Bytes(bytes_per_device)))
                .collect(),
        }
    }

    /// Device 0 gets `head`, every other device gets `rest`.
    ///
    /// The shape of hand-tuned partitions: the head device is starved so its
    /// capacity stays free for coordination overhead.
    pub fn reserved_head(device_count: usize, head: Budget, rest: Budget) -> Self {
        Self {
            budgets: (0..device_count)
                .map(|i| (i, if i == 0 { head.clone() } else { rest.clone() }))
                .collect(),
        }
    }

    /// Build from explicit entries, rejecting gaps in the device indices.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (usize, Budget)>,
    ) -> Result<Self, MemoryMapError> {
        let map = Self {
            budgets: entries.into_iter().collect(),
        };
        map.ensure_contiguous()?;
        Ok(map)
    }

    /// Check the `0..N` coverage invariant; deserialized maps go through
    /// this before the planner will hand them out.
    pub fn ensure_contiguous(&self) -> Result<(), MemoryMapError> {
        for (expected, &actual) in self.budgets.keys().enumerate() {
            if actual != expected {
                return Err(MemoryMapError::MissingDevice(expected));
            }
        }
        Ok(())
    }

    /// Number of devices covered.
    pub fn device_count(&self) -> usize {
        self.budgets.len()
    }

    /// Budget for one device.
    pub fn get(&self, device: usize) -> Option<&Budget> {
        self.budgets.get(&device)
    }

    /// Iterate budgets in device order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Budget)> + '_ {
        self.budgets.iter().map(|(device, budget)| (*device, budget))
    }

    /// Sum of all budgets in bytes.
    pub fn total_bytes(&self) -> Result<u64, MemoryMapError> {
        self.budgets.values().map(Budget::as_bytes).sum()
    }
}
