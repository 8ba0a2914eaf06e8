//! Command-line front end: plan a memory map and hand it to the loader.
//!
//! Prints the resulting map as JSON on stdout; everything else goes to the
//! log so the output stays machine-consumable.

use clap::Parser;
use tracing::info;

use vram_planner::config::{Cli, PlannerConfig};
use vram_planner::gpu::probe::{self, DeviceProbe};
use vram_planner::model::registry::{ArchitectureProvider, ConfigDirRegistry, StaticRegistry};
use vram_planner::plan::overrides::OverrideTable;
use vram_planner::plan::planner::MemoryPlanner;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "vram_planner=debug"
    } else {
        "vram_planner=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("vram-planner v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = PlannerConfig::load(&cli.config)?;

    info!(
        model = %cli.model,
        precision = %cli.precision,
        safety_margin = config.safety_margin,
        "Planning memory map"
    );

    let registry: Box<dyn ArchitectureProvider> = match &config.model_config_root {
        Some(root) => Box::new(ConfigDirRegistry::new(root.clone())),
        None => Box::new(StaticRegistry::builtin()),
    };

    let device_probe = build_probe();

    for dev in probe::inventory(device_probe.as_ref())? {
        info!(
            device = dev.id,
            total_vram = dev.total_vram,
            free_vram = dev.free_vram,
            "Detected device"
        );
    }

    let mut overrides = OverrideTable::builtin();
    if let Some(path) = &config.overrides_path {
        let added = overrides.merge_file(path)?;
        info!(added, path = %path.display(), "Merged operator override entries");
    }

    let planner = MemoryPlanner::new(registry.as_ref(), device_probe.as_ref())
        .with_config(config)
        .with_overrides(overrides);

    let map = planner.plan_memory_map(cli.precision, &cli.model)?;

    for (device, budget) in map.iter() {
        info!(device, budget = %budget, "Planned budget");
    }

    // The downstream loader consumes the map from stdout.
    println!("{}", serde_json::to_string_pretty(&map)?);

    Ok(())
}

fn build_probe() -> Box<dyn DeviceProbe> {
    #[cfg(feature = "cuda")]
    {
        Box::new(probe::CudaProbe::new())
    }

    #[cfg(not(feature = "cuda"))]
    {
        tracing::warn!("CUDA not enabled, probing a scripted stub topology");
        Box::new(probe::stub_probe_a100_node())
    }
}
