//! Default, swappable collaborator implementations (SPEC_FULL.md §6a): a
//! YAML-backed special-path catalog, mirroring the original's `cfg.go`.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pathspace::{SpecialPath, SpecialPathCatalog};

const DEFAULT_CONFIG_FILE: &str = ".goldleaf-agent.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpecialPathEntry {
    alias: String,
    host_path: String,
}

/// Persists the ordered `(alias, host_path)` list as a YAML sequence. Loaded
/// once at startup, rewritten on every `add`/`remove`.
pub struct YamlSpecialPathCatalog {
    path: PathBuf,
    entries: Mutex<Vec<SpecialPathEntry>>,
}

impl YamlSpecialPathCatalog {
    /// The default path: a dotfile in the user's home directory, as the
    /// original keeps its config beside the user's home (`cfg.go`).
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(DEFAULT_CONFIG_FILE))
    }

    pub fn load_or_default(path: PathBuf) -> Result<Self, ConfigError> {
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_yaml::from_str(&text)?
            }
        } else {
            Vec::new()
        };
        Ok(YamlSpecialPathCatalog {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &[SpecialPathEntry]) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(entries)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }
}

impl SpecialPathCatalog for YamlSpecialPathCatalog {
    fn size(&self) -> u32 {
        self.entries.lock().unwrap().len() as u32
    }

    fn list(&self) -> Vec<SpecialPath> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| SpecialPath {
                alias: e.alias.clone(),
                host_path: e.host_path.clone(),
            })
            .collect()
    }

    fn add(&self, alias: String, host_path: String) -> Result<(), ConfigError> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(SpecialPathEntry { alias, host_path });
        self.persist(&entries)
    }

    fn remove(&self, index: usize) -> Result<(), ConfigError> {
        let mut entries = self.entries.lock().unwrap();
        if index < entries.len() {
            entries.remove(index);
        }
        self.persist(&entries)
    }
}
