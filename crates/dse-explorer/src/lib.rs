//! # dse-explorer
//!
//! Top of the hlsdse stack: configuration, the per-partition exploration
//! loop, the engine that fans partitions out and collects outputs, and the
//! reporter.

pub mod config;
pub mod engine;
pub mod explorer;
pub mod reporter;

#[cfg(test)]
mod test_support;

pub use config::{CommandConfig, DesignSpaceConfig, DseConfig, EvaluateConfig, ProjectConfig, SearchConfig, TimeoutConfig};
pub use engine::{compile_partitions, prepare_workspace, DseEngine};
pub use explorer::{explored_key, Explorer, ExplorerSummary, StopReason};
pub use reporter::Reporter;
