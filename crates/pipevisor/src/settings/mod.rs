//! Typed settings registry and ranked source merging.
//!
//! Every key is declared up front in [`catalogue`]. Values arrive from three
//! ranked sources: compiled defaults, the settings file and the command line.
//! A value from a lower-ranked source never replaces one from a higher-ranked
//! source, regardless of the order in which sources are merged.

mod catalogue;
mod file;

pub use catalogue::{
    definitions, find_definition, split_path_list, Constraint, SettingDef,
    LOG_LEVELS,
};
pub use file::{load_settings_file, parse_settings, settings_file_path, FileSettings, SETTINGS_FILE_NAME};

use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration errors raised while coercing, validating or loading settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for setting '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Setting '{key}' expects a {expected} value, got {found}")]
    TypeMismatch {
        key: String,
        expected: SettingType,
        found: SettingType,
    },

    #[error("Invalid port range '{0}': expected N or N-M with N <= M")]
    InvalidRange(String),

    #[error("Failed to load settings file {path}: {message}")]
    File { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Declared type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    String,
    Int,
    Bool,
    Range,
    Path,
    PathList,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Int => "int",
            SettingType::Bool => "bool",
            SettingType::Range => "range",
            SettingType::Path => "path",
            SettingType::PathList => "path list",
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive port range. A single port is `low == high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    pub fn new(low: u16, high: u16) -> Result<Self> {
        if low > high {
            return Err(SettingsError::InvalidRange(format!("{low}-{high}")));
        }
        Ok(Self { low, high })
    }

    pub fn single(port: u16) -> Self {
        Self {
            low: port,
            high: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.low..=self.high).contains(&port)
    }
}

impl FromStr for PortRange {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || SettingsError::InvalidRange(s.to_string());

        let (low, high) = s.split_once('-').unwrap_or((s, s));
        let low: u16 = low.trim().parse().map_err(|_| invalid())?;
        let high: u16 = high.trim().parse().map_err(|_| invalid())?;
        PortRange::new(low, high).map_err(|_| invalid())
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// A typed setting value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    String(String),
    Int(i64),
    Bool(bool),
    Range(PortRange),
    Path(PathBuf),
    PathList(Vec<PathBuf>),
}

impl SettingValue {
    pub fn setting_type(&self) -> SettingType {
        match self {
            SettingValue::String(_) => SettingType::String,
            SettingValue::Int(_) => SettingType::Int,
            SettingValue::Bool(_) => SettingType::Bool,
            SettingValue::Range(_) => SettingType::Range,
            SettingValue::Path(_) => SettingType::Path,
            SettingValue::PathList(_) => SettingType::PathList,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::String(s) => f.write_str(s),
            SettingValue::Int(n) => write!(f, "{n}"),
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Range(r) => write!(f, "{r}"),
            SettingValue::Path(p) => write!(f, "{}", p.display()),
            SettingValue::PathList(paths) => {
                let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Where a setting's current value came from, lowest rank first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Default,
    File,
    Cli,
}

/// One registry entry
#[derive(Debug, Clone)]
pub struct Setting {
    def: &'static SettingDef,
    value: SettingValue,
    source: Source,
}

impl Setting {
    pub fn key(&self) -> &'static str {
        self.def.key
    }

    pub fn definition(&self) -> &'static SettingDef {
        self.def
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// True once any non-default source supplied the value.
    pub fn is_set(&self) -> bool {
        self.source != Source::Default
    }
}

/// Paths computed from a parent path unless set explicitly: (key, parent, leaf).
const DERIVED_PATHS: &[(&str, &str, &str)] = &[
    ("path.queue", "path.data", "queue"),
    ("path.dead_letter_queue", "path.data", "dead_letter_queue"),
];

/// Fixed-key store of typed settings for one invocation.
#[derive(Debug, Clone)]
pub struct SettingsRegistry {
    settings: IndexMap<&'static str, Setting>,
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsRegistry {
    /// Registry holding every declared setting at its default value.
    pub fn new() -> Self {
        let settings = definitions()
            .iter()
            .map(|def| {
                let setting = Setting {
                    def,
                    value: def.default_value(),
                    source: Source::Default,
                };
                (def.key, setting)
            })
            .collect();

        let mut registry = Self { settings };
        registry.derive_paths();
        registry
    }

    pub fn contains(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    pub fn setting(&self, key: &str) -> Result<&Setting> {
        self.settings
            .get(key)
            .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<&SettingValue> {
        self.setting(key).map(Setting::value)
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.get(key)? {
            SettingValue::String(s) => Ok(s),
            other => Err(self.mismatch(key, other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.get(key)? {
            SettingValue::Int(n) => Ok(*n),
            other => Err(self.mismatch(key, other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            SettingValue::Bool(b) => Ok(*b),
            other => Err(self.mismatch(key, other)),
        }
    }

    pub fn get_range(&self, key: &str) -> Result<PortRange> {
        match self.get(key)? {
            SettingValue::Range(r) => Ok(*r),
            other => Err(self.mismatch(key, other)),
        }
    }

    pub fn get_path(&self, key: &str) -> Result<&Path> {
        match self.get(key)? {
            SettingValue::Path(p) => Ok(p),
            other => Err(self.mismatch(key, other)),
        }
    }

    pub fn get_path_list(&self, key: &str) -> Result<&[PathBuf]> {
        match self.get(key)? {
            SettingValue::PathList(paths) => Ok(paths),
            other => Err(self.mismatch(key, other)),
        }
    }

    fn mismatch(&self, key: &str, found: &SettingValue) -> SettingsError {
        let expected = self
            .settings
            .get(key)
            .map(|s| s.def.ty)
            .unwrap_or(SettingType::String);
        SettingsError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.setting_type(),
        }
    }

    /// Whether `key` was supplied by a non-default source. Unknown keys are never set.
    pub fn is_set(&self, key: &str) -> bool {
        self.settings.get(key).is_some_and(Setting::is_set)
    }

    pub fn source(&self, key: &str) -> Option<Source> {
        self.settings.get(key).map(Setting::source)
    }

    /// Set one value programmatically. Ranks as a command line value.
    pub fn set(&mut self, key: &str, value: SettingValue) -> Result<()> {
        self.merge(Source::Cli, [(key, value)]).map(|_| ())
    }

    /// Apply `values` from `source`.
    ///
    /// All values are validated before any is applied. Within one call the
    /// last value for a key wins. A value is only applied when `source`
    /// ranks at least as high as the source of the current value.
    /// Returns the number of values applied.
    pub fn merge<I, K>(&mut self, source: Source, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, SettingValue)>,
        K: AsRef<str>,
    {
        let mut validated = Vec::new();
        for (key, value) in values {
            let setting = self.setting(key.as_ref())?;
            setting.def.check(&value)?;
            validated.push((setting.def.key, value));
        }

        let mut applied = 0;
        for (key, value) in validated {
            if let Some(setting) = self.settings.get_mut(key) {
                if source >= setting.source {
                    setting.value = value;
                    setting.source = source;
                    applied += 1;
                }
            }
        }

        if applied > 0 {
            self.derive_paths();
        }
        Ok(applied)
    }

    /// Recompute paths nested under a parent path, leaving explicit ones alone.
    pub fn derive_paths(&mut self) {
        for &(key, parent, leaf) in DERIVED_PATHS {
            if self.is_set(key) {
                continue;
            }
            let Ok(parent) = self.get_path(parent) else {
                continue;
            };
            let derived = parent.join(leaf);
            if let Some(setting) = self.settings.get_mut(key) {
                setting.value = SettingValue::Path(derived);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.values()
    }

    /// Settings supplied by a non-default source, in declaration order.
    pub fn explicit(&self) -> impl Iterator<Item = &Setting> {
        self.iter().filter(|s| s.is_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_parsing() {
        assert_eq!("10000".parse::<PortRange>().unwrap(), PortRange::single(10000));
        assert_eq!(
            "10000-20000".parse::<PortRange>().unwrap(),
            PortRange {
                low: 10000,
                high: 20000
            }
        );
        assert_eq!(" 9600 - 9601 ".parse::<PortRange>().unwrap().high, 9601);

        for bad in ["", "abc", "10-x", "20000-10000", "-5", "1-2-3", "70000"] {
            assert!(
                matches!(bad.parse::<PortRange>(), Err(SettingsError::InvalidRange(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn port_range_display_and_contains() {
        let range = PortRange::new(9600, 9700).unwrap();
        assert_eq!(range.to_string(), "9600-9700");
        assert_eq!(PortRange::single(9600).to_string(), "9600");
        assert!(range.contains(9650));
        assert!(!range.contains(9701));
    }

    #[test]
    fn defaults_are_not_set() {
        let registry = SettingsRegistry::new();
        assert_eq!(
            registry.get_range("api.http.port").unwrap(),
            PortRange::new(9600, 9700).unwrap()
        );
        assert!(!registry.is_set("api.http.port"));
        assert_eq!(registry.get_string("api.http.host").unwrap(), "127.0.0.1");
        assert!(!registry.get_bool("config.debug").unwrap());
        assert_eq!(registry.get_string("log.level").unwrap(), "info");
        assert_eq!(registry.source("pipeline.workers"), Some(Source::Default));
        assert!(registry.get_int("pipeline.workers").unwrap() >= 1);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let mut registry = SettingsRegistry::new();
        assert!(matches!(
            registry.get("does.not.exist"),
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(!registry.is_set("does.not.exist"));
        assert!(registry
            .set("does.not.exist", SettingValue::Bool(true))
            .is_err());
    }

    #[test]
    fn precedence_ignores_merge_order() {
        let mut registry = SettingsRegistry::new();
        registry
            .merge(Source::Cli, [("pipeline.workers", SettingValue::Int(20))])
            .unwrap();
        let applied = registry
            .merge(Source::File, [("pipeline.workers", SettingValue::Int(4))])
            .unwrap();

        assert_eq!(applied, 0);
        assert_eq!(registry.get_int("pipeline.workers").unwrap(), 20);
        assert_eq!(registry.source("pipeline.workers"), Some(Source::Cli));
    }

    #[test]
    fn file_overrides_default_and_marks_set() {
        let mut registry = SettingsRegistry::new();
        registry
            .merge(Source::File, [("pipeline.batch.size", SettingValue::Int(500))])
            .unwrap();
        assert_eq!(registry.get_int("pipeline.batch.size").unwrap(), 500);
        assert!(registry.is_set("pipeline.batch.size"));
    }

    #[test]
    fn last_value_within_one_source_wins() {
        let mut registry = SettingsRegistry::new();
        registry
            .merge(
                Source::Cli,
                [
                    ("pipeline.workers", SettingValue::Int(5)),
                    ("pipeline.workers", SettingValue::Int(20)),
                ],
            )
            .unwrap();
        assert_eq!(registry.get_int("pipeline.workers").unwrap(), 20);
    }

    #[test]
    fn merge_is_all_or_nothing() {
        let mut registry = SettingsRegistry::new();
        let err = registry
            .merge(
                Source::Cli,
                [
                    ("pipeline.batch.size", SettingValue::Int(10)),
                    ("pipeline.workers", SettingValue::String("many".into())),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, SettingsError::TypeMismatch { .. }));
        assert!(!registry.is_set("pipeline.batch.size"));
    }

    #[test]
    fn derived_paths_follow_data_root() {
        let mut registry = SettingsRegistry::new();
        assert_eq!(
            registry.get_path("path.queue").unwrap(),
            Path::new("data/queue")
        );

        registry
            .set("path.data", SettingValue::Path("/srv/data".into()))
            .unwrap();
        assert_eq!(
            registry.get_path("path.queue").unwrap(),
            Path::new("/srv/data/queue")
        );
        assert_eq!(
            registry.get_path("path.dead_letter_queue").unwrap(),
            Path::new("/srv/data/dead_letter_queue")
        );
        assert!(!registry.is_set("path.queue"));
    }

    #[test]
    fn explicit_nested_path_beats_derived_one() {
        let mut registry = SettingsRegistry::new();
        registry
            .merge(
                Source::Cli,
                [
                    ("path.queue", SettingValue::Path("/fast/queue".into())),
                    ("path.data", SettingValue::Path("/srv/data".into())),
                ],
            )
            .unwrap();

        assert_eq!(
            registry.get_path("path.queue").unwrap(),
            Path::new("/fast/queue")
        );
        assert_eq!(
            registry.get_path("path.dead_letter_queue").unwrap(),
            Path::new("/srv/data/dead_letter_queue")
        );
    }

    #[test]
    fn explicit_lists_only_set_keys_in_declaration_order() {
        let mut registry = SettingsRegistry::new();
        registry
            .set("api.http.host", SettingValue::String("0.0.0.0".into()))
            .unwrap();
        registry
            .set("pipeline.workers", SettingValue::Int(2))
            .unwrap();

        let keys: Vec<_> = registry.explicit().map(Setting::key).collect();
        assert_eq!(keys, vec!["pipeline.workers", "api.http.host"]);
    }

    #[test]
    fn typed_getter_mismatch() {
        let registry = SettingsRegistry::new();
        assert!(matches!(
            registry.get_int("api.http.host"),
            Err(SettingsError::TypeMismatch { .. })
        ));
    }
}
