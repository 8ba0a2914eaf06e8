//! Live hardware probing behind an injected capability.
//!
//! The planner never touches device state directly; it goes through
//! [`DeviceProbe`], so tests script capacities deterministically and a
//! CPU-only build still exercises the full planning path.
//!
//! Free-capacity reads follow a two-step protocol: [`DeviceProbe::warm_up`]
//! first, then [`DeviceProbe::free_capacity`]. A device that has not loaded
//! its runtime kernels reports roughly two gigabytes more free memory than
//! the loader will actually find, so reading without warming up produces an
//! optimistic floor.

use std::cell::RefCell;
use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("device index {0} out of range")]
    BadDevice(usize),

    #[error("driver error on device {device}: {reason}")]
    Driver { device: usize, reason: String },
}

/// Read-only view of the accelerators visible to this process.
///
/// Implementations must keep `free_capacity` consistent with the warm-up
/// protocol described at module level.
pub trait DeviceProbe {
    /// Number of visible devices.
    fn device_count(&self) -> usize;

    /// Total VRAM on one device, in bytes.
    fn total_capacity(&self, device: usize) -> Result<u64, ProbeError>;

    /// Currently free VRAM on one device, in bytes.
    ///
    /// Call [`DeviceProbe::warm_up`] on the device first or the reading is
    /// inflated by not-yet-resident runtime overhead.
    fn free_capacity(&self, device: usize) -> Result<u64, ProbeError>;

    /// Force a minimal allocation so the device runtime is resident before
    /// any free-capacity read.
    fn warm_up(&self, device: usize) -> Result<(), ProbeError>;
}

/// Point-in-time snapshot of one device, for startup logging.
#[derive(Debug, Clone, Serialize)]
pub struct GpuDeviceInfo {
    /// Device index.
    pub id: usize,

    /// Total VRAM in bytes.
    pub total_vram: u64,

    /// Free VRAM in bytes at snapshot time (raw, no warm-up).
    pub free_vram: u64,
}

/// Snapshot every visible device.
///
/// Raw readings for operator logs; planning reads go through the warm-up
/// protocol instead.
pub fn inventory(probe: &dyn DeviceProbe) -> Result<Vec<GpuDeviceInfo>, ProbeError> {
    (0..probe.device_count())
        .map(|id| {
            Ok(GpuDeviceInfo {
                id,
                total_vram: probe.total_capacity(id)?,
                free_vram: probe.free_capacity(id)?,
            })
        })
        .collect()
}

/// One probe interaction, recorded by [`ScriptedProbe`] for order assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCall {
    DeviceCount,
    TotalCapacity(usize),
    FreeCapacity(usize),
    WarmUp(usize),
}

/// Scripted capacity for one device.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    /// Total VRAM in bytes.
    pub total_vram: u64,

    /// Free VRAM in bytes once the device runtime is resident.
    pub free_vram: u64,
}

/// Deterministic probe for tests and CPU-only runs.
///
/// Models the warm-up measurement artifact: until [`DeviceProbe::warm_up`]
/// has been called on a device, its reported free capacity is inflated by
/// `runtime_overhead` bytes. Every call is recorded so tests can assert on
/// probe ordering.
pub struct ScriptedProbe {
    devices: Vec<ScriptedDevice>,
    runtime_overhead: u64,
    warmed: RefCell<HashSet<usize>>,
    calls: RefCell<Vec<ProbeCall>>,
}

/// Free-memory inflation observed on real hardware before kernels load.
const DEFAULT_RUNTIME_OVERHEAD: u64 = 2 << 30;

impl ScriptedProbe {
    pub fn new(devices: Vec<ScriptedDevice>) -> Self {
        Self {
            devices,
            runtime_overhead: DEFAULT_RUNTIME_OVERHEAD,
            warmed: RefCell::new(HashSet::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Homogeneous node: `count` identical devices.
    pub fn uniform(count: usize, total_vram: u64, free_vram: u64) -> Self {
        Self::new(
            (0..count)
                .map(|_| ScriptedDevice {
                    total_vram,
                    free_vram,
                })
                .collect(),
        )
    }

    pub fn with_runtime_overhead(mut self, bytes: u64) -> Self {
        self.runtime_overhead = bytes;
        self
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.borrow().clone()
    }

    fn device(&self, device: usize) -> Result<&ScriptedDevice, ProbeError> {
        self.devices.get(device).ok_or(ProbeError::BadDevice(device))
    }

    fn record(&self, call: ProbeCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl DeviceProbe for ScriptedProbe {
    fn device_count(&self) -> usize {
        self.record(ProbeCall::DeviceCount);
        self.devices.len()
    }

    fn total_capacity(&self, device: usize) -> Result<u64, ProbeError> {
        self.record(ProbeCall::TotalCapacity(device));
        Ok(self.device(device)?.total_vram)
    }

    fn free_capacity(&self, device: usize) -> Result<u64, ProbeError> {
        self.record(ProbeCall::FreeCapacity(device));
        let dev = self.device(device)?;
        if self.warmed.borrow().contains(&device) {
            Ok(dev.free_vram)
        } else {
            Ok(dev.free_vram + self.runtime_overhead)
        }
    }

    fn warm_up(&self, device: usize) -> Result<(), ProbeError> {
        self.record(ProbeCall::WarmUp(device));
        self.device(device)?;
        self.warmed.borrow_mut().insert(device);
        Ok(())
    }
}

/// Scripted 8x A100-80GB node.
pub fn stub_probe_a100_node() -> ScriptedProbe {
    ScriptedProbe::uniform(8, 80 << 30, 78 << 30)
}

/// Scripted 8x V100-16GB node.
pub fn stub_probe_v100_node() -> ScriptedProbe {
    ScriptedProbe::uniform(8, 16 << 30, 15 << 30)
}

/// Real probe backed by the CUDA driver.
///
/// Compile-time gated; filled in against cudarc where the toolkit is
/// available. CPU-only builds use [`ScriptedProbe`].
#[cfg(feature = "cuda")]
pub struct CudaProbe;

#[cfg(feature = "cuda")]
impl CudaProbe {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "cuda")]
impl DeviceProbe for CudaProbe {
    fn device_count(&self) -> usize {
        todo!("enumerate devices via cudarc")
    }

    fn total_capacity(&self, _device: usize) -> Result<u64, ProbeError> {
        todo!("read device total memory via cudarc")
    }

    fn free_capacity(&self, _device: usize) -> Result<u64, ProbeError> {
        todo!("read mem_get_info via cudarc")
    }

    fn warm_up(&self, _device: usize) -> Result<(), ProbeError> {
        todo!("allocate a one-element buffer to load kernels")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warm_up_settles_free_reading() {
        let probe = ScriptedProbe::uniform(2, 16 << 30, 10 << 30);

        // Cold read is inflated by the default runtime overhead.
        assert_eq!(probe.free_capacity(0).unwrap(), 12 << 30);

        probe.warm_up(0).unwrap();
        assert_eq!(probe.free_capacity(0).unwrap(), 10 << 30);

        // Device 1 was never warmed, still inflated.
        assert_eq!(probe.free_capacity(1).unwrap(), 12 << 30);
    }

    #[test]
    fn test_bad_device_index() {
        let probe = ScriptedProbe::uniform(1, 8 << 30, 7 << 30);
        assert!(matches!(
            probe.total_capacity(3),
            Err(ProbeError::BadDevice(3))
        ));
    }

    #[test]
    fn test_calls_recorded_in_order() {
        let probe = ScriptedProbe::uniform(1, 8 << 30, 7 << 30);
        probe.device_count();
        probe.warm_up(0).unwrap();
        probe.free_capacity(0).unwrap();

        assert_eq!(
            probe.calls(),
            vec![
                ProbeCall::DeviceCount,
                ProbeCall::WarmUp(0),
                ProbeCall::FreeCapacity(0),
            ]
        );
    }

    #[test]
    fn test_inventory_covers_all_devices() {
        let probe = stub_probe_a100_node();
        let devices = inventory(&probe).unwrap();
        assert_eq!(devices.len(), 8);
        assert!(devices.iter().all(|d| d.total_vram == 80 << 30));

        let small = stub_probe_v100_node();
        let devices = inventory(&small).unwrap();
        assert!(devices.iter().all(|d| d.total_vram == 16 << 30));
    }
}
