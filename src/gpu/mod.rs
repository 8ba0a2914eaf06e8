//! GPU device probing.
//!
//! - [`probe`]: the device-probe capability, its CUDA-backed implementation
//!   and scripted stand-ins for tests and CPU-only runs

pub mod probe;
