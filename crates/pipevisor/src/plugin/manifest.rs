//! Installed plugin manifest (`plugins.yml`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "plugins.yml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to write manifest {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// Package sources and installed plugins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

/// One installed plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub version: String,
    /// Version requirement passed to the resolver, e.g. `~> 3.1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Installed from a local path; excluded from updates unless forced
    #[serde(default, skip_serializing_if = "is_false")]
    pub local: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A plugin as seen by the resolver: name plus current version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRef {
    pub name: String,
    pub constraint: Option<String>,
}

impl PluginEntry {
    pub fn plugin_ref(&self) -> PluginRef {
        PluginRef {
            name: self.name.clone(),
            constraint: self.constraint.clone(),
        }
    }
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn find(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PluginEntry> {
        self.plugins.iter_mut().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
sources:
  - https://plugins.example.org
  - https://mirror.example.org
plugins:
  - name: input-beats
    version: 6.1.0
    constraint: "~> 6.0"
  - name: filter-custom
    version: 0.1.0
    local: true
"#;

    #[test]
    fn parses_manifest() {
        let manifest: PluginManifest = serde_yaml::from_str(MANIFEST).unwrap();
        assert_eq!(manifest.sources.len(), 2);
        assert_eq!(manifest.plugins.len(), 2);

        let beats = manifest.find("input-beats").unwrap();
        assert_eq!(beats.constraint.as_deref(), Some("~> 6.0"));
        assert!(!beats.local);
        assert!(manifest.find("filter-custom").unwrap().local);
        assert!(manifest.find("output-nope").is_none());
    }

    #[test]
    fn save_then_load_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let mut manifest: PluginManifest = serde_yaml::from_str(MANIFEST).unwrap();
        manifest.find_mut("input-beats").unwrap().version = "6.2.0".into();

        manifest.save(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("local: false"));

        assert_eq!(PluginManifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn load_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yml");
        let err = PluginManifest::load(&missing).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
        assert!(err.to_string().contains("absent.yml"));

        let broken = dir.path().join("broken.yml");
        std::fs::write(&broken, "plugins: {not: [a, list").unwrap();
        assert!(matches!(
            PluginManifest::load(&broken),
            Err(ManifestError::Parse { .. })
        ));
    }
}
