//! Application path resolution.
//!
//! The config file is looked up in order:
//!
//! 1. the `--config` flag,
//! 2. `config.yaml` in the current working directory,
//! 3. `$XDG_CONFIG_HOME/pw-shadow/config.yaml` (via `dirs::config_dir`).
//!
//! The first existing file wins. When none exists the last candidate is still
//! reported so the user knows where to put one; the daemon then runs on
//! defaults. Rolling log files go under `$XDG_STATE_HOME/pw-shadow/logs`, or
//! the data directory on platforms without a state directory.

use std::path::{Path, PathBuf};

/// Directory name used under the platform config/state directories
const APP_DIR: &str = "pw-shadow";

/// File name of the configuration file
const CONFIG_FILE: &str = "config.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Path to the configuration file (may not exist)
    pub config: PathBuf,
    /// Whether `config` exists
    pub config_exists: bool,
    /// Directory for rolling log files
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the environment.
    ///
    /// Note: This is called before logging is initialized, so nothing here
    /// logs; `main` reports the outcome once tracing is up.
    pub fn detect(config_override: Option<&Path>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(
            config_override,
            &cwd,
            dirs::config_dir().as_deref(),
            dirs::state_dir().or_else(dirs::data_dir).as_deref(),
        )
    }

    /// Resolve paths against explicit base directories.
    pub fn resolve(
        config_override: Option<&Path>,
        cwd: &Path,
        config_home: Option<&Path>,
        state_home: Option<&Path>,
    ) -> Self {
        let logs_dir = state_home
            .map(|dir| dir.join(APP_DIR).join("logs"))
            .unwrap_or_else(|| cwd.join("logs"));

        let candidates: Vec<PathBuf> = match config_override {
            Some(path) => vec![path.to_path_buf()],
            None => std::iter::once(cwd.join(CONFIG_FILE))
                .chain(config_home.map(|dir| dir.join(APP_DIR).join(CONFIG_FILE)))
                .collect(),
        };

        let found = candidates.iter().find(|path| path.is_file()).cloned();
        let config_exists = found.is_some();
        let config = found
            .or_else(|| candidates.last().cloned())
            .unwrap_or_else(|| cwd.join(CONFIG_FILE));

        Self {
            config,
            config_exists,
            logs_dir,
        }
    }

    /// Ensure the logs directory exists.
    pub fn ensure_logs_dir(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(())
    }
}
