//! `pipevisor-plugin` command line.

use argh::FromArgs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::coordinator::{PluginUpdateCoordinator, UpdateError, UpdateOptions, UpdateReport};
use super::manifest::{PluginManifest, MANIFEST_FILE_NAME};
use super::resolver::CommandResolver;
use crate::runner::{EXIT_FAILURE, EXIT_SUCCESS};

/// Manage pipeline plugins
#[derive(FromArgs, Debug, PartialEq)]
pub struct PluginCli {
    /// print version information
    #[argh(switch, short = 'V')]
    pub version: bool,

    /// settings directory holding the plugin manifest
    #[argh(option, short = 's', default = "PathBuf::from(\"config\")")]
    pub settings_dir: PathBuf,

    /// plugin manifest (default: <settings-dir>/plugins.yml)
    #[argh(option, short = 'm')]
    pub manifest: Option<PathBuf>,

    /// dependency resolver executable
    #[argh(option, default = "String::from(\"pipevisor-resolver\")")]
    pub resolver: String,

    /// seconds a single resolver call may take before it is killed
    #[argh(option, default = "600")]
    pub resolver_timeout: u64,

    #[argh(subcommand)]
    pub command: Option<PluginCommand>,
}

#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand)]
pub enum PluginCommand {
    Update(UpdateArgs),
    List(ListArgs),
}

/// Update installed plugins
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "update")]
pub struct UpdateArgs {
    /// plugins to update (default: all installed)
    #[argh(positional)]
    pub plugins: Vec<String>,

    /// how far versions may move: patch, minor or major
    #[argh(option, default = "String::from(\"minor\")")]
    pub level: String,

    /// allow dependencies of the targets to move too
    #[argh(switch)]
    pub no_conservative: bool,

    /// resolve from the local cache only
    #[argh(switch)]
    pub local: bool,

    /// skip the release compatibility check
    #[argh(switch)]
    pub no_verify: bool,

    /// include locally installed plugins
    #[argh(switch)]
    pub force: bool,
}

impl UpdateArgs {
    pub fn options(&self) -> UpdateOptions {
        UpdateOptions {
            level: self.level.clone(),
            conservative: !self.no_conservative,
            local: self.local,
            verify: !self.no_verify,
            force: self.force,
        }
    }
}

/// List installed plugins
#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand, name = "list")]
pub struct ListArgs {
    /// show constraints and sources
    #[argh(switch, short = 'v')]
    pub verbose: bool,
}

impl PluginCli {
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.settings_dir.join(MANIFEST_FILE_NAME))
    }

    pub fn command_resolver(&self) -> CommandResolver {
        CommandResolver::new(&self.resolver)
            .with_timeout(Duration::from_secs(self.resolver_timeout))
    }

    pub async fn run(self) -> i32 {
        if self.version {
            println!("pipevisor-plugin {}", env!("CARGO_PKG_VERSION"));
            return EXIT_SUCCESS;
        }

        let manifest = self.manifest_path();
        match &self.command {
            Some(PluginCommand::Update(args)) => {
                let coordinator = PluginUpdateCoordinator::new(self.command_resolver());
                update(&coordinator, &manifest, args).await
            }
            Some(PluginCommand::List(args)) => list(&manifest, args.verbose),
            None => {
                eprintln!("ERROR: no command given, expected `update` or `list`");
                EXIT_FAILURE
            }
        }
    }
}

async fn update<R: super::DependencyResolver>(
    coordinator: &PluginUpdateCoordinator<R>,
    manifest: &Path,
    args: &UpdateArgs,
) -> i32 {
    match coordinator
        .update_file(manifest, &args.plugins, &args.options())
        .await
    {
        Ok(report) => {
            print!("{}", format_report(&report));
            if report.has_failures() {
                EXIT_FAILURE
            } else {
                EXIT_SUCCESS
            }
        }
        Err(e @ UpdateError::UnsupportedLevel(_)) => {
            eprintln!("ERROR: {}", e);
            EXIT_FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            EXIT_FAILURE
        }
    }
}

fn list(manifest: &Path, verbose: bool) -> i32 {
    let manifest = match PluginManifest::load(manifest) {
        Ok(m) => m,
        Err(e) => {
            log::error!("{}", e);
            return EXIT_FAILURE;
        }
    };

    if manifest.plugins.is_empty() {
        println!("No plugins installed.");
        return EXIT_SUCCESS;
    }
    for plugin in &manifest.plugins {
        let mut line = format!("{} ({})", plugin.name, plugin.version);
        if verbose {
            if let Some(constraint) = &plugin.constraint {
                line.push_str(&format!(" constraint {}", constraint));
            }
            if plugin.local {
                line.push_str(" [local]");
            }
        }
        println!("{}", line);
    }
    if verbose {
        for source in &manifest.sources {
            println!("source: {}", source);
        }
    }
    EXIT_SUCCESS
}

/// One line per target, then a summary.
pub fn format_report(report: &UpdateReport) -> String {
    let mut out = String::new();
    for (name, outcome) in &report.outcomes {
        out.push_str(&format!("{}: {}\n", name, outcome));
    }
    out.push_str(&format!(
        "{} updated, {} skipped, {} failed\n",
        report.updated(),
        report.skipped(),
        report.failed()
    ));
    out
}
