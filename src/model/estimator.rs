//! Closed-form parameter-count estimation.
//!
//! An exact count would require materializing the model, which defeats the
//! point of pre-flight budgeting. Instead the total is derived from three
//! architecture numbers. The formula is calibrated for decoder-only
//! transformers of the BLOOM family (see the bigscience model-sizing notes).

/// Approximate total parameter count for a decoder-only transformer.
///
/// Per layer, attention and feed-forward weights dominate at `12h²` with
/// `13h` of bias and norm terms; the embedding table adds `v·h` and the
/// final layer norm and output projection biases another `4h`:
///
/// ```text
/// params = l * (12h² + 13h) + v·h + 4h
/// ```
pub fn estimate_params(hidden_size: u64, num_layers: u64, vocab_size: u64) -> u64 {
    let h = hidden_size;
    num_layers * (12 * h * h + 13 * h) + vocab_size * h + 4 * h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_exact() {
        let (h, l, v) = (64, 2, 1000);
        let expected = l * (12 * h * h + 13 * h) + v * h + 4 * h;
        assert_eq!(estimate_params(h, l, v), expected);
    }

    #[test]
    fn test_bloom_176b() {
        // BLOOM: hidden 14336, 70 layers, 250880 vocab entries.
        let params = estimate_params(14336, 70, 250_880);
        assert_eq!(params, 176_247_271_424);
    }

    #[test]
    fn test_layer_count_scales_linearly() {
        let shallow = estimate_params(1024, 10, 50_000);
        let deep = estimate_params(1024, 20, 50_000);
        let per_layer = 12 * 1024 * 1024 + 13 * 1024;
        assert_eq!(deep - shallow, 10 * per_layer);
    }
}
