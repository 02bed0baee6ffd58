//! Command line parsing for the runner.
//!
//! The clap command is built from the settings catalogue, so every declared
//! setting is reachable as `--<key>` plus its short and long aliases. Parsing
//! is pure: it performs no logging and its only I/O is checking that plugin
//! directories exist.

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use crate::settings::{
    definitions, split_path_list, SettingDef, SettingType, SettingValue, SettingsError,
};

/// Malformed or conflicting command line input
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Unrecognised option '{0}'")]
    UnknownFlag(String),

    #[error("Unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("Option '{0}' requires a value")]
    MissingValue(String),

    #[error("Invalid value for '{flag}': {source}")]
    InvalidValue {
        flag: String,
        #[source]
        source: SettingsError,
    },

    #[error("Option '{flag}' expects a directory, but '{}' is not one", path.display())]
    NotADirectory { flag: String, path: PathBuf },

    #[error("Options '{first}' and '{second}' cannot be used together: {reason}")]
    Conflict {
        first: &'static str,
        second: &'static str,
        reason: &'static str,
    },

    #[error("{0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, UsageError>;

/// Flags that short-circuit a normal run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    Help,
    Version,
}

/// Result of parsing one argument vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArgs {
    /// Explicit values in command line order
    pub values: Vec<(&'static str, SettingValue)>,
    pub modal: Option<Modal>,
    /// One notice per deprecated alias used
    pub deprecations: Vec<String>,
}

impl ParsedArgs {
    /// Last value given for `key`, if any.
    pub fn value(&self, key: &str) -> Option<&SettingValue> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Deprecated aliases for `log.level`: (long flag, level)
const DEPRECATED_LOG_FLAGS: &[(&str, &str)] = &[
    ("quiet", "error"),
    ("debug", "debug"),
    ("verbose", "info"),
];

const HELP_FLAGS: &[&str] = &["-h", "--help"];
const VERSION_ID: &str = "version";

fn setting_arg(def: &'static SettingDef) -> Arg {
    let mut arg = Arg::new(def.key)
        .long(def.key)
        .help(def.description)
        .value_name(def.ty.as_str());

    if let Some(short) = def.short_flag() {
        arg = arg.short(short);
    }
    for alias in def.long_aliases() {
        arg = arg.visible_alias(alias);
    }

    match def.ty {
        SettingType::Bool => arg
            .action(ArgAction::Set)
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true"),
        SettingType::PathList => arg.action(ArgAction::Append),
        SettingType::Int | SettingType::Range => {
            arg.action(ArgAction::Set).allow_negative_numbers(true)
        }
        SettingType::String | SettingType::Path => arg.action(ArgAction::Set),
    }
}

/// The runner's clap command.
pub fn command() -> Command {
    let mut cmd = Command::new("pipevisor")
        .about("Run and supervise a data processing pipeline")
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args_override_self(true)
        .args(definitions().iter().map(setting_arg));

    for (long, level) in DEPRECATED_LOG_FLAGS {
        cmd = cmd.arg(
            Arg::new(*long)
                .long(*long)
                .action(ArgAction::SetTrue)
                .help(format!("deprecated, same as --log.level={level}")),
        );
    }

    cmd.arg(
        Arg::new(VERSION_ID)
            .short('V')
            .long("version")
            .action(ArgAction::SetTrue)
            .help("print version and exit"),
    )
    .arg(
        Arg::new("help")
            .short('h')
            .long("help")
            .action(ArgAction::SetTrue)
            .help("print this help and exit"),
    )
}

/// Parse runner arguments (without the program name).
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<ParsedArgs> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();

    // Help wins even over otherwise malformed input.
    if args.iter().any(|a| HELP_FLAGS.contains(a)) {
        return Ok(ParsedArgs {
            modal: Some(Modal::Help),
            ..Default::default()
        });
    }

    let matches = command()
        .try_get_matches_from(args.iter().copied())
        .map_err(usage_error)?;

    let mut parsed = ParsedArgs::default();
    if matches.get_flag(VERSION_ID) {
        parsed.modal = Some(Modal::Version);
    }

    let mut ordered: Vec<(usize, &'static str, SettingValue)> = Vec::new();

    for def in definitions() {
        if matches.value_source(def.key) != Some(ValueSource::CommandLine) {
            continue;
        }
        let index = matches.index_of(def.key).unwrap_or(0);
        let value = match def.ty {
            SettingType::PathList => plugin_paths(def, &matches)?,
            _ => {
                let Some(raw) = matches.get_one::<String>(def.key) else {
                    continue;
                };
                def.coerce(raw).map_err(|source| UsageError::InvalidValue {
                    flag: format!("--{}", def.key),
                    source,
                })?
            }
        };
        ordered.push((index, def.key, value));
    }

    for (long, level) in DEPRECATED_LOG_FLAGS {
        if !matches.get_flag(long) {
            continue;
        }
        parsed
            .deprecations
            .push(format!("--{long} is deprecated, use --log.level={level} instead"));
        let index = matches.index_of(*long).unwrap_or(0);
        ordered.push((index, "log.level", SettingValue::String(level.to_string())));
    }

    ordered.sort_by_key(|(index, _, _)| *index);
    parsed.values = ordered
        .into_iter()
        .map(|(_, key, value)| (key, value))
        .collect();

    check_reload_conflict(
        matches!(
            parsed.value("config.reload.automatic"),
            Some(SettingValue::Bool(true))
        ),
        match parsed.value("config.string") {
            Some(SettingValue::String(s)) => s,
            _ => "",
        },
    )?;
    Ok(parsed)
}

/// Every occurrence accumulates; one bad entry registers none.
fn plugin_paths(def: &SettingDef, matches: &ArgMatches) -> Result<SettingValue> {
    let paths: Vec<PathBuf> = matches
        .get_many::<String>(def.key)
        .into_iter()
        .flatten()
        .flat_map(|raw| split_path_list(raw))
        .collect();

    if let Some(bad) = paths.iter().find(|p| !p.is_dir()) {
        return Err(UsageError::NotADirectory {
            flag: format!("--{}", def.key),
            path: bad.clone(),
        });
    }
    Ok(SettingValue::PathList(paths))
}

/// Automatic reload needs a file to watch, so it cannot be combined with an
/// inline configuration string.
pub fn check_reload_conflict(reload: bool, inline_config: &str) -> Result<()> {
    if reload && !inline_config.is_empty() {
        return Err(UsageError::Conflict {
            first: "-r",
            second: "-e",
            reason: "automatic reload requires a file-backed configuration",
        });
    }
    Ok(())
}

fn looks_like_flag(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-') && arg.parse::<f64>().is_err()
}

fn usage_error(err: clap::Error) -> UsageError {
    let context = |kind| match err.get(kind) {
        Some(ContextValue::String(s)) => Some(s.clone()),
        _ => None,
    };

    match (err.kind(), context(ContextKind::InvalidArg)) {
        (ErrorKind::UnknownArgument, Some(arg)) if looks_like_flag(&arg) => {
            UsageError::UnknownFlag(arg)
        }
        (ErrorKind::UnknownArgument, Some(arg)) => UsageError::UnexpectedArgument(arg),
        (ErrorKind::InvalidValue, Some(arg))
            if context(ContextKind::InvalidValue).is_some_and(|v| v.is_empty()) =>
        {
            UsageError::MissingValue(arg)
        }
        _ => {
            let rendered = err.render().to_string();
            let first = rendered.lines().next().unwrap_or_default();
            UsageError::Rejected(first.trim_start_matches("error: ").to_string())
        }
    }
}

/// Help text listing every flag.
pub fn help_text(program: &str) -> String {
    command()
        .bin_name(program.to_string())
        .render_help()
        .to_string()
}
