//! Build script for vram-planner.
//!
//! Nothing is compiled natively. When the `cuda` feature is enabled this
//! surfaces a reminder that the CUDA driver must be present at runtime for
//! the hardware probe; CPU-only builds need nothing.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_CUDA").is_some() {
        println!("cargo:warning=cuda feature enabled: the CUDA driver must be installed for hardware probing");
    }
}
