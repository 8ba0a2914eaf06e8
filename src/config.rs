//! Runtime configuration for vram-planner.
//!
//! The margin and the override figures are empirically tuned for specific
//! hardware and workloads, so everything tunable lives here as a named,
//! overridable value rather than a literal inside the planner.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::plan::precision::Precision;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vram-planner",
    about = "Per-device GPU memory budgeting for sharded model loading"
)]
pub struct Cli {
    /// Model identifier to plan for (e.g. "bigscience/bloom").
    pub model: String,

    /// Weight precision the model will be loaded at.
    #[arg(long, value_enum, default_value_t = Precision::Float16)]
    pub precision: Precision,

    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "planner.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Planner tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Multiplier applied to the uniform per-device estimate. Weights never
    /// split perfectly evenly and some device ends up holding a larger
    /// remainder shard, so the budget carries headroom.
    pub safety_margin: f64,

    /// Device whose capacity anchors both the override capacity class and
    /// the free-memory check.
    pub reference_device: usize,

    /// Root directory of per-model config.json files. Unset means the
    /// built-in architecture table.
    pub model_config_root: Option<PathBuf>,

    /// Extra hand-tuned override entries, merged over the built-ins.
    pub overrides_path: Option<PathBuf>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            safety_margin: 1.10,
            reference_device: 0,
            model_config_root: None,
            overrides_path: None,
        }
    }
}

impl PlannerConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing fields or a missing file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: PlannerConfig = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(PlannerConfig::default())
        }
    }
}
