//! Configuration management for the spyke CLI

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spyke_runtime::CoreConfig;
use spyke_storage::ImageMeta;

use crate::error::{CliError, CliResult};

/// Global CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Core parameters; dimensions are always taken from the loaded image
    pub core: CoreConfig,

    /// Run defaults
    pub run: RunDefaults,
}

/// Defaults for `spyke run` when the flag is not given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    /// Timesteps to simulate
    pub steps: u32,

    /// Install an echo-threshold neuron stage at this threshold
    pub echo_threshold: Option<u32>,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            steps: 100,
            echo_threshold: None,
        }
    }
}

impl CliConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the explicit file if given, else the user's default file if it exists
    pub fn resolve(explicit: Option<&Path>) -> CliResult<Self> {
        match explicit {
            Some(path) if !path.exists() => Err(CliError::missing_resource(format!(
                "config file {}",
                path.display()
            ))),
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(path) => Self::load_from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::config("Could not determine config directory"))?;
        Ok(config_dir.join("spyke").join("config.toml"))
    }

    /// Core configuration for `meta`, keeping every non-dimension setting from the file
    ///
    /// Input shifts are truncated or zero-extended to the image's type count.
    pub fn core_for_image(&self, meta: &ImageMeta) -> CoreConfig {
        let mut core = self.core.clone();
        core.n_neurons = meta.n_neurons;
        core.n_synapse_types = meta.n_synapse_types;
        core.delay_bits = meta.delay_bits;
        core.input_shifts.resize(meta.n_synapse_types as usize, 0);
        core
    }
}
