//! Recompose Common Utilities
//!
//! Shared infrastructure for all Recompose crates:
//! - Error taxonomy and result aliases
//! - Media clock utilities (timestamp remapping, time-scale clamping, drift)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
