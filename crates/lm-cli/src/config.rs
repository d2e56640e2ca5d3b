//! Configuration for the `lm` CLI: a small persisted config file.
//!
//! Precedence is CLI flags, then the config file, then the hardcoded
//! defaults below. The config file only carries values a user would
//! plausibly want to fix across invocations (default thread count, log
//! level); everything mode-specific (learning rate, beam width...) is a
//! typed flag on that subcommand, never a string-keyed map.

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Persisted CLI configuration, loaded from `~/.config/lm-toolkit/config.toml`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default logging level, used when `RUST_LOG` is unset.
    pub log_level: Option<String>,

    /// Default worker-thread count for `train`/`eval`, overridden by `--num-threads`.
    pub default_threads: Option<u32>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { log_level: Some("info".to_string()), default_threads: Some(1) }
    }
}

impl CliConfig {
    /// Load configuration from file, falling back to defaults if absent.
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| CliError::config(format!("invalid config file: {e}")))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("failed to serialize config: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// The default configuration file path: `~/.config/lm-toolkit/config.toml`.
    pub fn default_config_path() -> CliResult<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| CliError::config("could not determine config directory"))?;
        Ok(config_dir.join("lm-toolkit").join("config.toml"))
    }
}
