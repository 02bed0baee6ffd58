//! Declared settings: key, type, default and command line flags.

use std::path::PathBuf;

use super::{PortRange, Result, SettingType, SettingValue, SettingsError};

/// Extra validation applied after type coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    None,
    Positive,
    NonNegative,
    OneOf(&'static [&'static str]),
}

/// Static description of one setting
#[derive(Debug)]
pub struct SettingDef {
    pub key: &'static str,
    pub ty: SettingType,
    pub flags: &'static [&'static str],
    pub constraint: Constraint,
    pub default: fn() -> SettingValue,
    pub description: &'static str,
}

pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "fatal"];

impl SettingDef {
    pub fn default_value(&self) -> SettingValue {
        (self.default)()
    }

    /// Parse a raw string into this setting's declared type.
    pub fn coerce(&self, raw: &str) -> Result<SettingValue> {
        let invalid = |reason: &str| SettingsError::InvalidValue {
            key: self.key.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let value = match self.ty {
            SettingType::String => SettingValue::String(raw.to_string()),
            SettingType::Int => raw
                .trim()
                .parse::<i64>()
                .map(SettingValue::Int)
                .map_err(|_| invalid("not an integer"))?,
            SettingType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => SettingValue::Bool(true),
                "false" => SettingValue::Bool(false),
                _ => return Err(invalid("expected true or false")),
            },
            SettingType::Range => raw
                .parse::<PortRange>()
                .map(SettingValue::Range)
                .map_err(|_| invalid("expected N or N-M with N <= M"))?,
            SettingType::Path => SettingValue::Path(PathBuf::from(raw)),
            SettingType::PathList => SettingValue::PathList(split_path_list(raw)),
        };

        self.check(&value)?;
        Ok(value)
    }

    /// Single-letter alias, `w` for `-w`.
    pub fn short_flag(&self) -> Option<char> {
        self.flags
            .iter()
            .copied()
            .find(|f| f.len() == 2 && !f.starts_with("--"))
            .and_then(|f| f.chars().nth(1))
    }

    /// Long spellings other than `--<key>`, without the dashes.
    pub fn long_aliases(&self) -> impl Iterator<Item = &'static str> + '_ {
        let key = self.key;
        self.flags
            .iter()
            .copied()
            .filter_map(|f| f.strip_prefix("--"))
            .filter(move |long| *long != key)
    }

    /// Verify that an already typed value is acceptable for this setting.
    pub fn check(&self, value: &SettingValue) -> Result<()> {
        if value.setting_type() != self.ty {
            return Err(SettingsError::TypeMismatch {
                key: self.key.to_string(),
                expected: self.ty,
                found: value.setting_type(),
            });
        }

        let reason = match (self.constraint, value) {
            (Constraint::Positive, SettingValue::Int(n)) if *n <= 0 => "must be positive".to_string(),
            (Constraint::NonNegative, SettingValue::Int(n)) if *n < 0 => {
                "must not be negative".to_string()
            }
            (Constraint::OneOf(allowed), SettingValue::String(s)) if !allowed.contains(&s.as_str()) => {
                format!("expected one of {}", allowed.join(", "))
            }
            _ => return Ok(()),
        };

        Err(SettingsError::InvalidValue {
            key: self.key.to_string(),
            value: value.to_string(),
            reason,
        })
    }
}

/// Split a comma-separated list of paths, dropping empty entries.
pub fn split_path_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn default_node_name() -> SettingValue {
    let name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    SettingValue::String(name)
}

fn default_workers() -> SettingValue {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as i64)
        .unwrap_or(1);
    SettingValue::Int(cpus)
}

static DEFINITIONS: &[SettingDef] = &[
    SettingDef {
        key: "node.name",
        ty: SettingType::String,
        flags: &["-n", "--node.name"],
        constraint: Constraint::None,
        default: default_node_name,
        description: "name of this node, defaults to the hostname",
    },
    SettingDef {
        key: "path.config",
        ty: SettingType::String,
        flags: &["-f", "--path.config"],
        constraint: Constraint::None,
        default: || SettingValue::String(String::new()),
        description: "load pipeline configuration from a file or directory",
    },
    SettingDef {
        key: "config.string",
        ty: SettingType::String,
        flags: &["-e", "--config.string"],
        constraint: Constraint::None,
        default: || SettingValue::String(String::new()),
        description: "use the given string as the pipeline configuration",
    },
    SettingDef {
        key: "config.test_and_exit",
        ty: SettingType::Bool,
        flags: &["-t", "--config.test_and_exit"],
        constraint: Constraint::None,
        default: || SettingValue::Bool(false),
        description: "check configuration syntax and exit",
    },
    SettingDef {
        key: "config.reload.automatic",
        ty: SettingType::Bool,
        flags: &["-r", "--config.reload.automatic", "--auto-reload"],
        constraint: Constraint::None,
        default: || SettingValue::Bool(false),
        description: "reload the pipeline when the configuration file changes",
    },
    SettingDef {
        key: "config.debug",
        ty: SettingType::Bool,
        flags: &["--config.debug"],
        constraint: Constraint::None,
        default: || SettingValue::Bool(false),
        description: "print the compiled configuration as debug log output",
    },
    SettingDef {
        key: "pipeline.id",
        ty: SettingType::String,
        flags: &["--pipeline.id"],
        constraint: Constraint::None,
        default: || SettingValue::String("main".to_string()),
        description: "pipeline identifier",
    },
    SettingDef {
        key: "pipeline.workers",
        ty: SettingType::Int,
        flags: &["-w", "--pipeline.workers"],
        constraint: Constraint::Positive,
        default: default_workers,
        description: "number of pipeline workers, defaults to the number of CPUs",
    },
    SettingDef {
        key: "pipeline.batch.size",
        ty: SettingType::Int,
        flags: &["-b", "--pipeline.batch.size"],
        constraint: Constraint::Positive,
        default: || SettingValue::Int(125),
        description: "events per worker batch",
    },
    SettingDef {
        key: "pipeline.batch.delay",
        ty: SettingType::Int,
        flags: &["-u", "--pipeline.batch.delay"],
        constraint: Constraint::NonNegative,
        default: || SettingValue::Int(50),
        description: "milliseconds to wait for a full batch",
    },
    SettingDef {
        key: "path.data",
        ty: SettingType::Path,
        flags: &["--path.data"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("data")),
        description: "root directory for persistent data",
    },
    SettingDef {
        key: "path.queue",
        ty: SettingType::Path,
        flags: &["--path.queue"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("data").join("queue")),
        description: "persistent queue directory, defaults to <path.data>/queue",
    },
    SettingDef {
        key: "path.dead_letter_queue",
        ty: SettingType::Path,
        flags: &["--path.dead_letter_queue"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("data").join("dead_letter_queue")),
        description: "dead letter queue directory, defaults to <path.data>/dead_letter_queue",
    },
    SettingDef {
        key: "path.settings",
        ty: SettingType::Path,
        flags: &["--path.settings"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("config")),
        description: "directory containing pipevisor.yml",
    },
    SettingDef {
        key: "path.logs",
        ty: SettingType::Path,
        flags: &["-l", "--path.logs"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("logs")),
        description: "directory for log files",
    },
    SettingDef {
        key: "path.plugins",
        ty: SettingType::PathList,
        flags: &["-p", "--pluginpath", "--path.plugins"],
        constraint: Constraint::None,
        default: || SettingValue::PathList(Vec::new()),
        description: "comma-separated plugin directories",
    },
    SettingDef {
        key: "log.level",
        ty: SettingType::String,
        flags: &["--log.level"],
        constraint: Constraint::OneOf(LOG_LEVELS),
        default: || SettingValue::String("info".to_string()),
        description: "log level: trace, debug, info, warn, error or fatal",
    },
    SettingDef {
        key: "api.enabled",
        ty: SettingType::Bool,
        flags: &["--api.enabled"],
        constraint: Constraint::None,
        default: || SettingValue::Bool(true),
        description: "expose the monitoring API",
    },
    SettingDef {
        key: "api.http.host",
        ty: SettingType::String,
        flags: &["--api.http.host"],
        constraint: Constraint::None,
        default: || SettingValue::String("127.0.0.1".to_string()),
        description: "monitoring API bind host",
    },
    SettingDef {
        key: "api.http.port",
        ty: SettingType::Range,
        flags: &["--api.http.port"],
        constraint: Constraint::None,
        default: || SettingValue::Range(PortRange { low: 9600, high: 9700 }),
        description: "monitoring API port or port range (N or N-M)",
    },
    SettingDef {
        key: "allow_superuser",
        ty: SettingType::Bool,
        flags: &["--allow_superuser"],
        constraint: Constraint::None,
        default: || SettingValue::Bool(false),
        description: "allow running as the superuser",
    },
    SettingDef {
        key: "engine.command",
        ty: SettingType::Path,
        flags: &["--engine.command"],
        constraint: Constraint::None,
        default: || SettingValue::Path(PathBuf::from("pipeline-engine")),
        description: "pipeline engine executable",
    },
];

/// All declared settings, in presentation order.
pub fn definitions() -> &'static [SettingDef] {
    DEFINITIONS
}

pub fn find_definition(key: &str) -> Option<&'static SettingDef> {
    DEFINITIONS.iter().find(|d| d.key == key)
}
