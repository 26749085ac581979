use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, VoxError};
use crate::external::demucs::DemucsConfig;
use crate::external::diarize::DiarizerConfig;
use crate::features::FeatureConfig;
use crate::matching::scorer::{default_weights, Weights};
use crate::pipeline::preprocess::PreprocessOptions;

pub const LOCAL_CONFIG_FILE: &str = "voxsift.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub preprocess: PreprocessOptions,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub demucs: DemucsConfig,
    #[serde(default)]
    pub diarizer: DiarizerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioConfig {
    /// Every input is resampled to this rate
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    /// Per-kind weights layered over the defaults
    #[serde(default)]
    pub weights: Weights,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Worker threads; 0 uses every core
    #[serde(default)]
    pub threads: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_sample_rate() -> u32 { 16000 }
fn default_timeout_secs() -> u64 { 3600 }

impl MatchingConfig {
    pub fn weights(&self) -> Weights {
        let mut weights = default_weights();
        weights.extend(self.weights.iter().map(|(k, w)| (*k, *w)));
        weights
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate < 8000 {
            return Err(VoxError::config(format!(
                "audio.sample_rate must be at least 8000 Hz, got {}",
                self.audio.sample_rate
            )));
        }
        if self.tools.timeout_secs == 0 {
            return Err(VoxError::config("tools.timeout_secs must be positive"));
        }
        self.preprocess.validate()?;
        self.features.validate()?;
        Ok(())
    }
}

pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text).map_err(|e| VoxError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| VoxError::io(path, e))?;
    parse_config(&content)
        .map_err(|e| VoxError::config(format!("{}: {}", path.display(), e)))
}

/// `./voxsift.toml`, then `~/.config/voxsift/config.toml`, then the platform
/// config directory.
pub fn discover_config() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("voxsift").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("voxsift").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
