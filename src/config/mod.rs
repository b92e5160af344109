//! Configuration management for pw-shadow
//!
//! Handles loading, parsing, and hot-reloading of the YAML configuration file.
//! Every section is optional; a missing file or section means defaults.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::graph::keys;
use crate::mirror::SyncSource;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Which discovered nodes get a shadow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Exact `application.name` values to mirror
    #[serde(default = "default_app_names")]
    pub app_names: Vec<String>,
    /// Object type of candidate globals
    #[serde(default = "default_node_type")]
    pub node_type: String,
}

/// How shadow streams are created
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ShadowConfig {
    #[serde(default = "default_true")]
    pub autoconnect: bool,
    #[serde(default = "default_true")]
    pub map_buffers: bool,
    /// Appended to the original's media name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,
}

/// Parameter sync settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Side whose parameters win the first sync after binding
    #[serde(default)]
    pub initial_source: SyncSource,
}

/// Pipeline monitoring
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Warn about entries not bound after this many seconds (0 disables)
    #[serde(default = "default_stall_warning_secs")]
    pub stall_warning_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            app_names: default_app_names(),
            node_type: default_node_type(),
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            autoconnect: true,
            map_buffers: true,
            name_suffix: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stall_warning_secs: default_stall_warning_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        // An empty file deserializes to unit, not to an empty mapping
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.matching.node_type.is_empty() {
            anyhow::bail!("matching.node_type cannot be empty");
        }
        if self.matching.app_names.is_empty() {
            anyhow::bail!("matching.app_names must list at least one application");
        }
        for (idx, name) in self.matching.app_names.iter().enumerate() {
            if name.trim().is_empty() {
                anyhow::bail!("matching.app_names[{}] cannot be empty", idx);
            }
        }

        if let Some(suffix) = &self.shadow.name_suffix {
            if suffix.is_empty() {
                anyhow::bail!("shadow.name_suffix cannot be empty (omit it instead)");
            }
        }

        Ok(())
    }

    /// Stall warning threshold, or None when disabled
    pub fn stall_after(&self) -> Option<Duration> {
        match self.monitor.stall_warning_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_app_names() -> Vec<String> {
    vec!["Chromium".to_string(), "Chromium input".to_string()]
}
fn default_node_type() -> String { keys::NODE_TYPE.to_string() }
fn default_true() -> bool { true }
fn default_stall_warning_secs() -> u64 { 30 }
