//! Settings file (`pipevisor.yml`) loading.
//!
//! Nested mappings and dotted keys are both accepted:
//!
//! ```yaml
//! pipeline:
//!   workers: 4
//! pipeline.batch.size: 250
//! ```

use serde_yaml::Value;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use super::{find_definition, Result, SettingValue, SettingsError};

pub const SETTINGS_FILE_NAME: &str = "pipevisor.yml";

/// Values read from a settings file, already coerced to their declared types
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSettings {
    pub path: PathBuf,
    pub values: Vec<(&'static str, SettingValue)>,
    /// Keys present in the file but not declared; reported, never applied
    pub unknown_keys: Vec<String>,
}

pub fn settings_file_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE_NAME)
}

/// Load `<dir>/pipevisor.yml`.
///
/// Returns `Ok(None)` when the directory or the file does not exist.
pub fn load_settings_file(dir: &Path) -> Result<Option<FileSettings>> {
    let path = settings_file_path(dir);
    if !path.is_file() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| file_error(&path, e))?;
    parse_settings(&contents, &path).map(Some)
}

/// Parse settings YAML. `origin` is only used in error messages.
pub fn parse_settings(yaml: &str, origin: &Path) -> Result<FileSettings> {
    let document: Value = serde_yaml::from_str(yaml).map_err(|e| file_error(origin, e))?;

    let mut flat = Vec::new();
    match &document {
        Value::Null => {}
        Value::Mapping(_) => flatten("", &document, origin, &mut flat)?,
        _ => return Err(file_error(origin, "top level must be a mapping")),
    }

    let mut settings = FileSettings {
        path: origin.to_path_buf(),
        ..Default::default()
    };
    for (key, value) in flat {
        match find_definition(&key) {
            Some(def) => {
                let raw = scalar_to_string(&key, value, origin)?;
                settings.values.push((def.key, def.coerce(&raw)?));
            }
            None => settings.unknown_keys.push(key),
        }
    }
    Ok(settings)
}

fn flatten<'a>(
    prefix: &str,
    value: &'a Value,
    origin: &Path,
    out: &mut Vec<(String, &'a Value)>,
) -> Result<()> {
    let Value::Mapping(mapping) = value else {
        out.push((prefix.to_string(), value));
        return Ok(());
    };

    for (key, child) in mapping {
        let key = match key {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Err(file_error(origin, format!("unsupported key under '{prefix}'"))),
        };
        let full = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        flatten(&full, child, origin, out)?;
    }
    Ok(())
}

fn scalar_to_string(key: &str, value: &Value, origin: &Path) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Sequence(items) => {
            let parts = items
                .iter()
                .map(|item| scalar_to_string(key, item, origin))
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(","))
        }
        Value::Null => Err(file_error(origin, format!("'{key}' has no value"))),
        _ => Err(file_error(origin, format!("'{key}' must be a scalar or a list"))),
    }
}

fn file_error(path: &Path, message: impl Display) -> SettingsError {
    SettingsError::File {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
