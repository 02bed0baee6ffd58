//! Pipeline collaborator interface.
//!
//! The runner only knows a pipeline through [`Pipeline`]: build it from the
//! merged settings, execute it and shut it down.

pub mod service;
pub mod syntax;

pub use service::{ServicePipeline, ServicePipelineFactory};
pub use syntax::{check_config, ConfigSummary, ConfigSyntaxError};

use async_trait::async_trait;
use pipevisor_service::SupervisorError;

use crate::settings::{SettingsError, SettingsRegistry};

/// Errors raised while constructing or running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Engine error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Pipeline failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A runnable pipeline
#[async_trait]
pub trait Pipeline: Send {
    /// Run until the pipeline stops and report its exit code.
    async fn execute(&mut self) -> Result<i32>;

    /// Release everything the pipeline holds. Safe to call more than once.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Builds a pipeline from the fully merged settings
pub trait PipelineFactory: Send + Sync {
    fn create(&self, settings: &SettingsRegistry) -> Result<Box<dyn Pipeline>>;
}

impl<F> PipelineFactory for F
where
    F: Fn(&SettingsRegistry) -> Result<Box<dyn Pipeline>> + Send + Sync,
{
    fn create(&self, settings: &SettingsRegistry) -> Result<Box<dyn Pipeline>> {
        self(settings)
    }
}
