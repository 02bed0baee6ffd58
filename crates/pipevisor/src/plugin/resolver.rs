//! Dependency resolver collaborator.
//!
//! The resolution algorithm lives in an external tool. This module only
//! shapes its requests and reads its JSON answers.

use async_trait::async_trait;
use pipevisor_service::{run_to_completion, CommandSpec, SupervisorError, TIMEOUT_MAXIMUM};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::coordinator::PluginUpdateRequest;
use super::manifest::PluginRef;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("Resolver command failed: {0}")]
    Command(#[from] SupervisorError),

    #[error("Resolver exited with code {exit_code:?}: {output}")]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Invalid resolver output: {0}")]
    InvalidOutput(String),
}

pub type Result<T> = std::result::Result<T, ResolverError>;

/// Latest published release of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub version: String,
    /// Whether the release declares itself a pipeline plugin
    #[serde(default)]
    pub service_plugin: bool,
}

#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Latest release of each plugin, keyed by plugin name.
    async fn latest_releases(
        &self,
        plugins: &[PluginRef],
        sources: &[String],
    ) -> Result<BTreeMap<String, Release>>;

    /// Resolve and install `request`, returning the resulting version of each
    /// target keyed by plugin name.
    async fn invoke(
        &self,
        request: &PluginUpdateRequest,
        sources: &[String],
    ) -> Result<BTreeMap<String, String>>;
}

/// Drives an external resolver executable.
///
/// ```text
/// <program> update --minor --conservative --source S... NAME[:CONSTRAINT]...
/// <program> outdated --json --source S... NAME...
/// ```
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: PathBuf,
    base_args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout: TIMEOUT_MAXIMUM,
        }
    }

    /// Arguments placed before the subcommand.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the resolver if a single call outlives `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn update_args(request: &PluginUpdateRequest, sources: &[String]) -> Vec<String> {
        let mut args = vec!["update".to_string(), request.level.flag().to_string()];
        if request.conservative {
            args.push("--conservative".to_string());
        }
        if request.local {
            args.push("--local".to_string());
        }
        push_sources(&mut args, sources);
        args.extend(request.targets.iter().map(|plugin| match &plugin.constraint {
            Some(constraint) => format!("{}:{}", plugin.name, constraint),
            None => plugin.name.clone(),
        }));
        args
    }

    pub fn outdated_args(plugins: &[PluginRef], sources: &[String]) -> Vec<String> {
        let mut args = vec!["outdated".to_string(), "--json".to_string()];
        push_sources(&mut args, sources);
        args.extend(plugins.iter().map(|p| p.name.clone()));
        args
    }

    async fn run_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let spec = CommandSpec::new(&self.program)
            .args(self.base_args.iter().cloned())
            .args(args);
        let status = run_to_completion(&spec, self.timeout).await?;

        if !status.success() {
            return Err(ResolverError::Failed {
                exit_code: status.exit_code,
                output: status.output.trim().to_string(),
            });
        }
        serde_json::from_str(status.output.trim())
            .map_err(|e| ResolverError::InvalidOutput(e.to_string()))
    }
}

fn push_sources(args: &mut Vec<String>, sources: &[String]) {
    for source in sources {
        args.push("--source".to_string());
        args.push(source.clone());
    }
}

#[async_trait]
impl DependencyResolver for CommandResolver {
    async fn latest_releases(
        &self,
        plugins: &[PluginRef],
        sources: &[String],
    ) -> Result<BTreeMap<String, Release>> {
        self.run_json(Self::outdated_args(plugins, sources)).await
    }

    async fn invoke(
        &self,
        request: &PluginUpdateRequest,
        sources: &[String],
    ) -> Result<BTreeMap<String, String>> {
        self.run_json(Self::update_args(request, sources)).await
    }
}
