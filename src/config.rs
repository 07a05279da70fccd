//! Project configuration
//!
//! Reads and writes the optional `.specdeck.yaml` at the project root.
//! Absence of the file means defaults everywhere.

use crate::store::CONFIG_FILE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Guard settings for the autonomous loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Paths the loop must never touch. An adjustment whose change
    /// description mentions one of these is rejected.
    #[serde(default = "GuardConfig::default_protected_paths")]
    pub protected_paths: Vec<String>,
}

impl GuardConfig {
    fn default_protected_paths() -> Vec<String> {
        vec![
            "Cargo.toml".to_string(),
            "Cargo.lock".to_string(),
            ".git/".to_string(),
        ]
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            protected_paths: Self::default_protected_paths(),
        }
    }
}

/// Top-level project configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Configuration file manager.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager for a project root.
    pub fn new(project_root: &Path) -> Self {
        Self {
            config_path: project_root.join(CONFIG_FILE),
        }
    }

    /// Check if the config file exists.
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found.
    pub fn read(&self) -> Result<ProjectConfig, String> {
        if !self.config_path.exists() {
            return Ok(ProjectConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| format!("failed to read config file: {}", e))?;

        serde_yaml::from_str(&content).map_err(|e| format!("failed to parse config file: {}", e))
    }

    /// Write config to file.
    pub fn write(&self, config: &ProjectConfig) -> Result<(), String> {
        let content = serde_yaml::to_string(config)
            .map_err(|e| format!("failed to serialize config: {}", e))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| format!("failed to write config file: {}", e))
    }

    /// Update specific fields in the config.
    pub fn update<F>(&self, updater: F) -> Result<ProjectConfig, String>
    where
        F: FnOnce(&mut ProjectConfig),
    {
        let mut config = self.read()?;
        updater(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}
