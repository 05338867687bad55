//! esprobe-core — identity types and configuration shared by every
//! esprobe crate.

pub mod config;
pub mod types;

pub use config::{ConfigError, ConfigResult, ProbeConfig, SummaryWindow};
pub use types::*;
