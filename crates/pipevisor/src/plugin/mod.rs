//! Plugin updates.
//!
//! The manifest records what is installed, the coordinator decides what may
//! change and the resolver (an external tool) does the actual resolution.

pub mod cli;
pub mod coordinator;
pub mod manifest;
pub mod resolver;

pub use cli::{format_report, PluginCli};
pub use coordinator::{
    PluginUpdateCoordinator, PluginUpdateRequest, SkipReason, UpdateError, UpdateLevel,
    UpdateOptions, UpdateOutcome, UpdateReport,
};
pub use manifest::{ManifestError, PluginEntry, PluginManifest, PluginRef, MANIFEST_FILE_NAME};
pub use resolver::{CommandResolver, DependencyResolver, Release, ResolverError};
