//! Pipevisor
//!
//! Command-line front end for a pipeline engine that runs as a child process.
//!
//! - [`settings`]: typed settings with defaults, a YAML settings file and
//!   command-line overrides merged by precedence
//! - [`cli`]: argument parsing into settings values and modal flags
//! - [`runner`]: validation, test-and-exit and pipeline execution
//! - [`pipeline`]: the pipeline interface, its config syntax checker and the
//!   process-backed implementation
//! - [`plugin`]: plugin manifest and update coordination

pub mod cli;
pub mod pipeline;
pub mod plugin;
pub mod runner;
pub mod settings;

pub use runner::{Runner, EXIT_FAILURE, EXIT_SUCCESS};
pub use settings::{SettingValue, SettingsRegistry};
