//! Weight precision and its per-parameter storage cost.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Numeric representation used for model weights during inference.
///
/// `Float16` and `BFloat16` cost the same number of bytes but are kept
/// distinct: hand-tuned override entries are keyed by the exact dtype the
/// partition was validated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Precision {
    /// 8-bit integer quantization (LLM.int8() style).
    #[serde(rename = "int8")]
    #[value(name = "int8")]
    Int8,

    /// IEEE 754 half precision.
    #[serde(rename = "float16")]
    #[value(name = "float16")]
    Float16,

    /// 16-bit float with the float32 exponent range.
    #[serde(rename = "bfloat16")]
    #[value(name = "bfloat16")]
    BFloat16,

    /// IEEE 754 single precision.
    #[serde(rename = "float32")]
    #[value(name = "float32")]
    Float32,
}

impl Precision {
    /// Storage width in bits.
    pub fn bit_width(&self) -> u32 {
        match self {
            Precision::Int8 => 8,
            Precision::Float16 | Precision::BFloat16 => 16,
            Precision::Float32 => 32,
        }
    }

    /// Bytes needed to hold one weight at this precision.
    ///
    /// Quantized weights are stored as one byte each; floating formats cost
    /// their bit width divided by eight.
    pub fn bytes_per_param(&self) -> u64 {
        match self {
            Precision::Int8 => 1,
            _ => u64::from(self.bit_width()) / 8,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Int8 => write!(f, "int8"),
            Precision::Float16 => write!(f, "float16"),
            Precision::BFloat16 => write!(f, "bfloat16"),
            Precision::Float32 => write!(f, "float32"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_param() {
        assert_eq!(Precision::Int8.bytes_per_param(), 1);
        assert_eq!(Precision::Float16.bytes_per_param(), 2);
        assert_eq!(Precision::BFloat16.bytes_per_param(), 2);
        assert_eq!(Precision::Float32.bytes_per_param(), 4);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Precision::BFloat16).unwrap();
        assert_eq!(json, "\"bfloat16\"");

        let back: Precision = serde_json::from_str("\"int8\"").unwrap();
        assert_eq!(back, Precision::Int8);
    }
}
