//! The memory-planning operation.
//!
//! One call per process at model-load time. The planner either returns a
//! complete per-device map or fails fast; an infeasible placement is never
//! retried here, the operator changes the run parameters and relaunches.

use thiserror::Error;
use tracing::{info, warn};

use crate::config::PlannerConfig;
use crate::gpu::probe::{DeviceProbe, ProbeError};
use crate::model::registry::{ArchitectureProvider, RegistryError};
use crate::plan::memory_map::{gib, DeviceMemoryMap};
use crate::plan::overrides::{CapacityClass, OverrideKey, OverrideTable};
use crate::plan::precision::Precision;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no visible devices to plan across")]
    NoDevices,

    #[error(transparent)]
    Configuration(#[from] RegistryError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(
        "estimated {required_bytes} bytes per device but only {available_bytes} bytes are free; \
         use a smaller precision, a smaller model or more devices"
    )]
    InsufficientMemory {
        required_bytes: u64,
        available_bytes: u64,
    },
}

/// Plans per-device memory budgets for loading a sharded model.
///
/// Both collaborators are injected: the architecture provider so config
/// fetching can be scripted, the device probe so hardware state can be.
/// The planner itself is stateless; every call probes fresh.
pub struct MemoryPlanner<'a> {
    registry: &'a dyn ArchitectureProvider,
    probe: &'a dyn DeviceProbe,
    config: PlannerConfig,
    overrides: OverrideTable,
}

impl<'a> MemoryPlanner<'a> {
    /// Planner with default tuning and the built-in override table.
    pub fn new(registry: &'a dyn ArchitectureProvider, probe: &'a dyn DeviceProbe) -> Self {
        Self {
            registry,
            probe,
            config: PlannerConfig::default(),
            overrides: OverrideTable::builtin(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        self.overrides = overrides;
        self
    }

    /// Produce the per-device byte budgets for loading `model_id` at
    /// `precision` on the currently visible devices.
    ///
    /// A hand-tuned override for the exact
    /// (model, device count, capacity class, precision) combination wins
    /// outright. Otherwise the parameter-count estimate is priced at the
    /// requested precision, split uniformly with the safety margin, and
    /// checked against the free memory probed on the reference device.
    pub fn plan_memory_map(
        &self,
        precision: Precision,
        model_id: &str,
    ) -> Result<DeviceMemoryMap, PlanError> {
        let device_count = self.probe.device_count();
        if device_count == 0 {
            return Err(PlanError::NoDevices);
        }

        let reference = self.config.reference_device;
        let total_capacity = self.probe.total_capacity(reference)?;

        if let Some(capacity_class) = CapacityClass::classify(total_capacity) {
            let key = OverrideKey {
                model_id: model_id.to_string(),
                device_count,
                capacity_class,
                precision,
            };
            if let Some(map) = self.overrides.lookup(&key) {
                info!(
                    model = model_id,
                    devices = device_count,
                    class = %capacity_class,
                    precision = %precision,
                    "Using hand-tuned memory map"
                );
                return Ok(map.clone());
            }
        }

        let arch = self
            .registry
            .get_architecture_spec(model_id)
            .inspect_err(|_| {
                warn!(
                    model = model_id,
                    "Architecture config is broken or missing; notify the model owner"
                );
            })?;

        let params = arch.estimate_params();
        let total_bytes = params * precision.bytes_per_param();
        let per_device_bytes = (total_bytes as f64 / device_count as f64
            * self.config.safety_margin) as u64;

        info!(
            model = model_id,
            params,
            per_device_gib = format_args!("{:.2}", gib(per_device_bytes)),
            "Estimated per-device weight footprint"
        );

        // Warm up before reading: a cold device under-reports its runtime
        // overhead and the free figure comes back optimistic.
        self.probe.warm_up(reference)?;
        let available_bytes = self.probe.free_capacity(reference)?;

        if per_device_bytes > available_bytes {
            return Err(PlanError::InsufficientMemory {
                required_bytes: per_device_bytes,
                available_bytes,
            });
        }

        info!(
            free_gib = format_args!("{:.2}", gib(available_bytes)),
            devices = device_count,
            "Memory map fits probed capacity"
        );

        Ok(DeviceMemoryMap::uniform(device_count, per_device_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::probe::ScriptedProbe;
    use crate::model::registry::{ModelArchitectureSpec, StaticRegistry};

    fn small_model_registry() -> StaticRegistry {
        StaticRegistry::empty().with_model(
            "acme/tiny",
            ModelArchitectureSpec {
                hidden_size: 1024,
                num_layers: 24,
                vocab_size: 50_000,
            },
        )
    }

    #[test]
    fn test_general_path_margin() {
        let registry = small_model_registry();
        let probe = ScriptedProbe::uniform(4, 24 << 30, 20 << 30);
        let planner = MemoryPlanner::new(&registry, &probe);

        let map = planner
            .plan_memory_map(Precision::Float32, "acme/tiny")
            .unwrap();

        let params = registry
            .get_architecture_spec("acme/tiny")
            .unwrap()
            .estimate_params();
        let total = params * 4;
        let expected = (total as f64 / 4.0 * 1.10) as u64;
        assert_eq!(map.get(0).unwrap().as_bytes().unwrap(), expected);
        assert_eq!(map.device_count(), 4);
    }

    #[test]
    fn test_no_devices() {
        let registry = small_model_registry();
        let probe = ScriptedProbe::new(Vec::new());
        let planner = MemoryPlanner::new(&registry, &probe);

        assert!(matches!(
            planner.plan_memory_map(Precision::Float16, "acme/tiny"),
            Err(PlanError::NoDevices)
        ));
    }

    #[test]
    fn test_unknown_model_is_fatal() {
        let registry = StaticRegistry::empty();
        let probe = ScriptedProbe::uniform(2, 24 << 30, 20 << 30);
        let planner = MemoryPlanner::new(&registry, &probe);

        assert!(matches!(
            planner.plan_memory_map(Precision::Float16, "acme/absent"),
            Err(PlanError::Configuration(RegistryError::UnknownModel(_)))
        ));
    }
}
