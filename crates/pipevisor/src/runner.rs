//! One invocation of the runner: parse, merge, validate, execute.
//!
//! ```text
//! START -> PARSE_ARGS -> { USAGE_ERROR, VALIDATE }
//! VALIDATE -> { FATAL, TEST_ONLY_EXIT, EXECUTE }
//! EXECUTE -> { EXIT_CLEAN, EXIT_WITH_AGENT_CODE }
//! ```

use log::LevelFilter;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cli::{check_reload_conflict, help_text, parse_args, Modal, ParsedArgs, UsageError};
use crate::pipeline::{check_config, ConfigSyntaxError, PipelineError, PipelineFactory};
use crate::settings::{
    load_settings_file, SettingValue, SettingsError, SettingsRegistry, Source,
};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 1;

const PRODUCT_NAME: &str = "pipevisor";

/// Failures that end a run
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] SettingsError),

    #[error("{0} cannot be run as superuser.")]
    SecurityPolicy(String),

    #[error("Invalid pipeline configuration: {0}")]
    Syntax(#[from] ConfigSyntaxError),

    #[error("No pipeline configuration given, use -e or -f")]
    NoConfiguration,

    #[error("Failed to read pipeline configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Where the runner reports what happened
pub trait RunLog: Send + Sync {
    fn fatal(&self, message: &str, error: &RunnerError);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn deprecated(&self, message: &str);

    /// Apply the effective `log.level`.
    fn set_level(&self, level: LevelFilter) {
        log::set_max_level(level);
    }
}

/// Forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdLog;

impl RunLog for StdLog {
    fn fatal(&self, message: &str, error: &RunnerError) {
        log::error!("{} {}", message, error);
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", message);
    }

    fn info(&self, message: &str) {
        log::info!("{}", message);
    }

    fn deprecated(&self, message: &str) {
        log::warn!(target: "pipevisor::deprecation", "DEPRECATION WARNING: {}", message);
    }
}

/// Effective user of the current process
pub trait UserContext: Send + Sync {
    fn is_superuser(&self) -> bool;
}

/// The real effective user.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessUser;

impl UserContext for ProcessUser {
    #[cfg(unix)]
    fn is_superuser(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_superuser(&self) -> bool {
        false
    }
}

/// `log.level` value to a filter. `fatal` has no level of its own.
pub fn level_filter(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" | "fatal" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub struct Runner {
    factory: Box<dyn PipelineFactory>,
    log: Box<dyn RunLog>,
    user: Box<dyn UserContext>,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl Runner {
    pub fn new(factory: impl PipelineFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            log: Box::new(StdLog),
            user: Box::new(ProcessUser),
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        }
    }

    pub fn with_log(mut self, log: impl RunLog + 'static) -> Self {
        self.log = Box::new(log);
        self
    }

    pub fn with_user(mut self, user: impl UserContext + 'static) -> Self {
        self.user = Box::new(user);
        self
    }

    /// Destinations for help, version and usage messages.
    pub fn with_output(
        mut self,
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        self.stdout = Box::new(stdout);
        self.stderr = Box::new(stderr);
        self
    }

    /// Run one invocation and return the process exit code.
    pub async fn run<S: AsRef<str>>(&mut self, args: &[S]) -> i32 {
        let parsed = match parse_args(args) {
            Ok(parsed) => parsed,
            Err(e) => return self.usage_error(&e.into()),
        };

        if parsed.modal == Some(Modal::Help) {
            let _ = write!(self.stdout, "{}", help_text(PRODUCT_NAME));
            return EXIT_SUCCESS;
        }

        for notice in &parsed.deprecations {
            self.log.deprecated(notice);
        }

        let settings = match self.resolve_settings(&parsed) {
            Ok(settings) => settings,
            Err(e) if parsed.modal == Some(Modal::Version) => {
                self.log.warn(&format!("Ignoring settings: {e}"));
                return self.print_version();
            }
            Err(e) => {
                self.log.fatal("An unexpected error occurred!", &e);
                return EXIT_FAILURE;
            }
        };

        let level = settings.get_string("log.level").unwrap_or("info");
        self.log.set_level(level_filter(level));

        if parsed.modal == Some(Modal::Version) {
            return self.print_version();
        }

        // The file may enable reload while the command line passes -e.
        if let Err(e) = check_merged_conflicts(&settings) {
            return self.usage_error(&e);
        }

        if let Ok(paths) = settings.get_path_list("path.plugins") {
            for path in paths {
                self.log
                    .info(&format!("Registered plugin path {}", path.display()));
            }
        }

        self.validate_and_execute(&settings).await
    }

    fn usage_error(&mut self, error: &RunnerError) -> i32 {
        let _ = writeln!(self.stderr, "ERROR: {error}");
        let _ = writeln!(self.stderr, "See '{PRODUCT_NAME} --help'");
        EXIT_USAGE
    }

    fn print_version(&mut self) -> i32 {
        let _ = writeln!(self.stdout, "{} {}", PRODUCT_NAME, env!("CARGO_PKG_VERSION"));
        EXIT_SUCCESS
    }

    /// Defaults, then the settings file, then the command line.
    fn resolve_settings(&self, parsed: &ParsedArgs) -> Result<SettingsRegistry> {
        let mut settings = SettingsRegistry::new();

        let settings_dir = match parsed.value("path.settings") {
            Some(SettingValue::Path(dir)) => dir.clone(),
            _ => settings.get_path("path.settings")?.to_path_buf(),
        };

        match load_settings_file(&settings_dir)? {
            Some(file) => {
                for key in &file.unknown_keys {
                    self.log.warn(&format!(
                        "Ignoring unknown setting '{}' in {}",
                        key,
                        file.path.display()
                    ));
                }
                settings.merge(Source::File, file.values)?;
            }
            None => self.log.warn(&format!(
                "No settings file found in {}, using defaults",
                settings_dir.display()
            )),
        }

        settings.merge(Source::Cli, parsed.values.iter().cloned())?;
        settings.derive_paths();
        Ok(settings)
    }

    async fn validate_and_execute(&mut self, settings: &SettingsRegistry) -> i32 {
        if self.user.is_superuser() {
            if settings.get_bool("allow_superuser").unwrap_or(false) {
                self.log.warn(&format!(
                    "NOTICE: Allowing {PRODUCT_NAME} to run as superuser is heavily discouraged as it poses a security risk."
                ));
            } else {
                let err = RunnerError::SecurityPolicy(PRODUCT_NAME.to_string());
                self.log.fatal("An unexpected error occurred!", &err);
                return EXIT_FAILURE;
            }
        }

        if settings.get_bool("config.test_and_exit").unwrap_or(false) {
            return match test_configuration(settings) {
                Ok(summary) => {
                    self.log
                        .info(&format!("Configuration OK ({summary})"));
                    EXIT_SUCCESS
                }
                Err(e) => {
                    self.log.fatal("The given configuration is invalid.", &e);
                    EXIT_FAILURE
                }
            };
        }

        let mut pipeline = match self.factory.create(settings) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.log
                    .fatal("Failed to start the pipeline.", &RunnerError::Pipeline(e));
                return EXIT_FAILURE;
            }
        };

        let result = pipeline.execute().await;
        if let Err(e) = pipeline.shutdown().await {
            self.log.warn(&format!("Pipeline shutdown failed: {e}"));
        }

        match result {
            Ok(code) => code,
            Err(e) => {
                self.log
                    .fatal("An unexpected error occurred!", &RunnerError::Pipeline(e));
                EXIT_FAILURE
            }
        }
    }
}

/// Cross-setting rules that only hold once every source is merged.
pub fn check_merged_conflicts(settings: &SettingsRegistry) -> Result<()> {
    check_reload_conflict(
        settings.get_bool("config.reload.automatic").unwrap_or(false),
        settings.get_string("config.string").unwrap_or(""),
    )?;
    Ok(())
}

/// Parse the configuration source without running it.
pub fn test_configuration(settings: &SettingsRegistry) -> Result<crate::pipeline::ConfigSummary> {
    let source = read_config_source(settings)?;
    Ok(check_config(&source)?)
}

/// The inline configuration string, or the contents of `path.config`.
///
/// A directory yields its `*.conf` files concatenated in name order.
pub fn read_config_source(settings: &SettingsRegistry) -> Result<String> {
    let inline = settings.get_string("config.string")?;
    if !inline.is_empty() {
        return Ok(inline.to_string());
    }

    let path = settings.get_string("path.config")?;
    if path.is_empty() {
        return Err(RunnerError::NoConfiguration);
    }
    read_config_path(Path::new(path))
}

fn read_config_path(path: &Path) -> Result<String> {
    let read_error = |source| RunnerError::ConfigRead {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        return std::fs::read_to_string(path).map_err(read_error);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(read_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();

    let mut combined = String::new();
    for file in files {
        let contents = std::fs::read_to_string(&file).map_err(|source| RunnerError::ConfigRead {
            path: file.clone(),
            source,
        })?;
        combined.push_str(&contents);
        combined.push('\n');
    }
    Ok(combined)
}
