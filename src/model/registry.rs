//! Architecture descriptors and the providers that fetch them.
//!
//! The planner never loads weights; it only needs the handful of config
//! numbers that drive the parameter-count estimate. Providers fetch those
//! numbers by model identifier, either from a local directory of HF-style
//! `config.json` files or from a built-in table of well-known models.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::estimator::estimate_params;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown model identifier: {0}")]
    UnknownModel(String),

    #[error("config for {model} is unreadable: {source}")]
    Unreadable {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config for {model} is broken: {reason}")]
    Malformed { model: String, reason: String },
}

/// The architecture numbers that size a model.
///
/// Deserialized from `config.json` as published on model hubs; the layer
/// count appears under several names across model families, so aliases are
/// accepted. Fetched fresh on every planning call, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArchitectureSpec {
    /// Transformer hidden dimension.
    pub hidden_size: u64,

    /// Number of transformer layers.
    #[serde(alias = "n_layer", alias = "num_hidden_layers")]
    pub num_layers: u64,

    /// Vocabulary size (embedding rows).
    pub vocab_size: u64,
}

impl ModelArchitectureSpec {
    /// Approximate total parameter count for this architecture.
    pub fn estimate_params(&self) -> u64 {
        estimate_params(self.hidden_size, self.num_layers, self.vocab_size)
    }

    fn validated(self, model: &str) -> Result<Self, RegistryError> {
        if self.hidden_size == 0 || self.num_layers == 0 || self.vocab_size == 0 {
            return Err(RegistryError::Malformed {
                model: model.to_string(),
                reason: "hidden_size, num_layers and vocab_size must all be positive".to_string(),
            });
        }
        Ok(self)
    }
}

/// Fetches architecture metadata by model identifier.
///
/// Injected into the planner so tests can script it.
pub trait ArchitectureProvider {
    fn get_architecture_spec(&self, model_id: &str) -> Result<ModelArchitectureSpec, RegistryError>;
}

/// Reads `<root>/<model_id>/config.json` from a local model cache.
///
/// The on-disk layout matches what a hub download step leaves behind, so a
/// node that has already fetched model snapshots needs no extra plumbing.
pub struct ConfigDirRegistry {
    root: PathBuf,
}

impl ConfigDirRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ArchitectureProvider for ConfigDirRegistry {
    fn get_architecture_spec(&self, model_id: &str) -> Result<ModelArchitectureSpec, RegistryError> {
        let path = self.root.join(model_id).join("config.json");
        if !path.exists() {
            return Err(RegistryError::UnknownModel(model_id.to_string()));
        }

        let data = std::fs::read_to_string(&path).map_err(|source| RegistryError::Unreadable {
            model: model_id.to_string(),
            source,
        })?;

        let spec: ModelArchitectureSpec =
            serde_json::from_str(&data).map_err(|e| RegistryError::Malformed {
                model: model_id.to_string(),
                reason: e.to_string(),
            })?;
        let spec = spec.validated(model_id)?;

        info!(
            model = model_id,
            hidden_size = spec.hidden_size,
            layers = spec.num_layers,
            vocab = spec.vocab_size,
            "Loaded architecture config"
        );

        Ok(spec)
    }
}

/// Built-in table of well-known architectures.
///
/// Serves the CLI default path and tests; a deployment with a model cache
/// directory uses [`ConfigDirRegistry`] instead.
pub struct StaticRegistry {
    specs: HashMap<String, ModelArchitectureSpec>,
}

impl StaticRegistry {
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// The BLOOM family ships with the planner.
    pub fn builtin() -> Self {
        Self::empty()
            .with_model(
                "bigscience/bloom",
                ModelArchitectureSpec {
                    hidden_size: 14336,
                    num_layers: 70,
                    vocab_size: 250_880,
                },
            )
            .with_model(
                "bigscience/bloom-7b1",
                ModelArchitectureSpec {
                    hidden_size: 4096,
                    num_layers: 30,
                    vocab_size: 250_880,
                },
            )
            .with_model(
                "bigscience/bloom-560m",
                ModelArchitectureSpec {
                    hidden_size: 1024,
                    num_layers: 24,
                    vocab_size: 250_880,
                },
            )
    }

    pub fn with_model(mut self, model_id: &str, spec: ModelArchitectureSpec) -> Self {
        self.specs.insert(model_id.to_string(), spec);
        self
    }
}

impl ArchitectureProvider for StaticRegistry {
    fn get_architecture_spec(&self, model_id: &str) -> Result<ModelArchitectureSpec, RegistryError> {
        self.specs
            .get(model_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownModel(model_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_bloom() {
        let registry = StaticRegistry::builtin();
        let spec = registry.get_architecture_spec("bigscience/bloom").unwrap();
        assert_eq!(spec.hidden_size, 14336);
        assert_eq!(spec.estimate_params(), 176_247_271_424);
    }

    #[test]
    fn test_unknown_model() {
        let registry = StaticRegistry::empty();
        let err = registry.get_architecture_spec("nobody/nothing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModel(_)));
    }

    #[test]
    fn test_layer_count_aliases() {
        // BLOOM configs publish the layer count as n_layer.
        let spec: ModelArchitectureSpec =
            serde_json::from_str(r#"{"hidden_size": 1024, "n_layer": 24, "vocab_size": 250880}"#)
                .unwrap();
        assert_eq!(spec.num_layers, 24);

        // Llama-style configs use num_hidden_layers.
        let spec: ModelArchitectureSpec = serde_json::from_str(
            r#"{"hidden_size": 4096, "num_hidden_layers": 32, "vocab_size": 32000}"#,
        )
        .unwrap();
        assert_eq!(spec.num_layers, 32);
    }

    #[test]
    fn test_zero_field_rejected() {
        let spec = ModelArchitectureSpec {
            hidden_size: 0,
            num_layers: 70,
            vocab_size: 250_880,
        };
        assert!(spec.validated("broken/model").is_err());
    }
}
