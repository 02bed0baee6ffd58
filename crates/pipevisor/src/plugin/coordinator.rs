//! Plugin update coordination.
//!
//! Shapes an update request from CLI-style options, validates it, hands it
//! to the [`DependencyResolver`] and reports what happened to every target.

use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::manifest::{ManifestError, PluginManifest, PluginRef};
use super::resolver::DependencyResolver;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("unsupported level `{0}`, expected one of patch, minor, major")]
    UnsupportedLevel(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// How far a version may move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateLevel {
    Patch,
    Minor,
    Major,
}

impl UpdateLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateLevel::Patch => "patch",
            UpdateLevel::Minor => "minor",
            UpdateLevel::Major => "major",
        }
    }

    /// Resolver flag for this level.
    pub fn flag(&self) -> &'static str {
        match self {
            UpdateLevel::Patch => "--patch",
            UpdateLevel::Minor => "--minor",
            UpdateLevel::Major => "--major",
        }
    }
}

impl FromStr for UpdateLevel {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch" => Ok(UpdateLevel::Patch),
            "minor" => Ok(UpdateLevel::Minor),
            "major" => Ok(UpdateLevel::Major),
            other => Err(UpdateError::UnsupportedLevel(other.to_string())),
        }
    }
}

impl fmt::Display for UpdateLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Unvalidated level string
    pub level: String,
    pub conservative: bool,
    pub local: bool,
    pub verify: bool,
    pub force: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            level: "minor".to_string(),
            conservative: true,
            local: false,
            verify: true,
            force: false,
        }
    }
}

/// A validated request handed to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpdateRequest {
    pub targets: Vec<PluginRef>,
    pub level: UpdateLevel,
    pub conservative: bool,
    pub local: bool,
    pub verify: bool,
}

impl PluginUpdateRequest {
    pub fn new(targets: Vec<PluginRef>, options: &UpdateOptions) -> Result<Self> {
        Ok(Self {
            level: options.level.parse()?,
            targets,
            conservative: options.conservative,
            local: options.local,
            verify: options.verify,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyCurrent,
    LocallyModified,
}

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { from: String, to: String },
    Skipped(SkipReason),
    Failed(String),
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Updated { from, to } => write!(f, "updated {from} -> {to}"),
            UpdateOutcome::Skipped(SkipReason::AlreadyCurrent) => {
                f.write_str("skipped (already up to date)")
            }
            UpdateOutcome::Skipped(SkipReason::LocallyModified) => {
                f.write_str("skipped (locally installed, use --force to include)")
            }
            UpdateOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Per-target outcomes in target order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub outcomes: IndexMap<String, UpdateOutcome>,
}

impl UpdateReport {
    pub fn get(&self, name: &str) -> Option<&UpdateOutcome> {
        self.outcomes.get(name)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, UpdateOutcome::Updated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UpdateOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UpdateOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&UpdateOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }

    fn record(&mut self, name: &str, outcome: UpdateOutcome) {
        self.outcomes.insert(name.to_string(), outcome);
    }

    fn fail_all(&mut self, plugins: &[PluginRef], reason: &str) {
        for plugin in plugins {
            self.record(&plugin.name, UpdateOutcome::Failed(reason.to_string()));
        }
    }
}

pub struct PluginUpdateCoordinator<R> {
    resolver: R,
}

impl<R: DependencyResolver> PluginUpdateCoordinator<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Update `targets` (every installed plugin when empty) in `manifest`.
    ///
    /// An unsupported level is rejected before anything else happens.
    /// Resolver failures are reported per target and leave `manifest`
    /// untouched.
    pub async fn update(
        &self,
        manifest: &mut PluginManifest,
        targets: &[String],
        options: &UpdateOptions,
    ) -> Result<UpdateReport> {
        // Validated before the resolver is consulted at all.
        let mut request = PluginUpdateRequest::new(Vec::new(), options)?;

        let names: Vec<String> = if targets.is_empty() {
            manifest.plugins.iter().map(|p| p.name.clone()).collect()
        } else {
            targets.to_vec()
        };

        let mut report = UpdateReport::default();
        let mut pending: Vec<PluginRef> = Vec::new();
        for name in names {
            if report.outcomes.contains_key(&name) {
                continue;
            }
            match manifest.find(&name) {
                None => report.record(&name, UpdateOutcome::Failed("not installed".to_string())),
                Some(entry) if entry.local && !options.force => {
                    log::warn!("Skipping locally installed plugin {} (use --force to include it)", name);
                    report.record(&name, UpdateOutcome::Skipped(SkipReason::LocallyModified));
                }
                Some(entry) => {
                    // Stays AlreadyCurrent unless the resolver moves it.
                    report.record(&name, UpdateOutcome::Skipped(SkipReason::AlreadyCurrent));
                    pending.push(entry.plugin_ref());
                }
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        if options.verify {
            match self
                .resolver
                .latest_releases(&pending, &manifest.sources)
                .await
            {
                Ok(releases) => pending.retain(|plugin| match releases.get(&plugin.name) {
                    Some(release) if !release.service_plugin => {
                        let reason = format!(
                            "incompatible: {} {} is not a pipeline plugin",
                            plugin.name, release.version
                        );
                        report.record(&plugin.name, UpdateOutcome::Failed(reason));
                        false
                    }
                    _ => true,
                }),
                Err(e) => {
                    log::error!("Version verification failed: {}", e);
                    report.fail_all(&pending, &e.to_string());
                    return Ok(report);
                }
            }
            if pending.is_empty() {
                return Ok(report);
            }
        } else {
            log::info!("Skipping plugin version verification");
        }

        request.targets = pending;
        log::info!(
            "Updating {} plugin(s), level {}, conservative {}",
            request.targets.len(),
            request.level,
            request.conservative
        );

        let resolved = match self.resolver.invoke(&request, &manifest.sources).await {
            Ok(resolved) => resolved,
            Err(e) => {
                log::error!("Plugin update failed: {}", e);
                report.fail_all(&request.targets, &e.to_string());
                return Ok(report);
            }
        };

        for plugin in &request.targets {
            let Some(entry) = manifest.find_mut(&plugin.name) else {
                continue;
            };
            if let Some(version) = resolved.get(&plugin.name) {
                if *version != entry.version {
                    report.record(
                        &plugin.name,
                        UpdateOutcome::Updated {
                            from: entry.version.clone(),
                            to: version.clone(),
                        },
                    );
                    entry.version = version.clone();
                }
            }
        }

        Ok(report)
    }

    /// Load the manifest at `path`, update it and save it if anything changed.
    pub async fn update_file(
        &self,
        path: &Path,
        targets: &[String],
        options: &UpdateOptions,
    ) -> Result<UpdateReport> {
        options.level.parse::<UpdateLevel>()?;

        let mut manifest = PluginManifest::load(path)?;
        let report = self.update(&mut manifest, targets, options).await?;
        if report.updated() > 0 {
            manifest.save(path)?;
            log::info!("Saved {}", path.display());
        }
        Ok(report)
    }
}
