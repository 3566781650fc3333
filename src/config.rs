use crate::utils::check_num;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path};

/// Processing configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rolling: RollingConfig,
    pub region: RegionConfig,
    pub sync: SyncConfig,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub synth: SynthConfig,
}

/// Rolling statistics parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RollingConfig {
    /// Window of the smoothing mean (`Avg_*` columns).
    pub avg_len: usize,
    /// Window of the standard deviation, skewness and kurtosis.
    pub stat_len: usize,
    /// Windows per derived column cross-checked against the reference.
    #[serde(default)]
    pub verify_windows: usize,
    /// Largest tolerated deviation from the reference.
    #[serde(default = "default_verify_tol")]
    pub verify_tol: f64,
}

fn default_verify_tol() -> f64 {
    1e-4
}

/// Active region detection parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Channel whose column delimits the active region.
    pub channel: String,
    /// Column scanned for the region (usually a rolling average).
    pub column: String,
    pub threshold: f64,
    /// Seconds trimmed from both ends of the detected region.
    #[serde(default)]
    pub margin_s: f64,
}

/// Synchronization parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Channel whose timestamps form the aligned timeline.
    pub basis: String,
    /// Columns a cached aligned table must contain to be reused.
    #[serde(default)]
    pub expected_columns: Vec<String>,
}

/// One input channel of a data folder.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// File name inside the data folder.
    pub file: String,
    /// Nominal sample rate.
    pub rate_hz: f64,
    /// Columns that get rolling statistics.
    #[serde(default)]
    pub rolling: Vec<String>,
    /// Columns contributed to the aligned table.
    #[serde(default)]
    pub sync: Vec<String>,
}

/// Synthetic recording parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    pub duration_s: f64,
    pub seed: u64,
    pub n_folders: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            duration_s: 10.0,
            seed: 0,
            n_folders: 1,
        }
    }
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|ch_cfg| ch_cfg.name == name)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.rolling.avg_len, 3..10_000_000).context("invalid averaging window")?;
        check_num(self.rolling.stat_len, 3..10_000_000).context("invalid statistics window")?;
        check_num(self.rolling.verify_windows, 0..10_000).context("invalid number of verified windows")?;
        check_num(self.rolling.verify_tol, 0.0..1.0).context("invalid verification tolerance")?;

        check_num(self.region.margin_s, 0.0..3600.0).context("invalid region margin")?;
        if !self.region.threshold.is_finite() {
            bail!("region threshold must be finite");
        }

        if self.channels.is_empty() {
            bail!("at least one channel must be declared");
        }
        let mut names = HashSet::new();
        for ch_cfg in &self.channels {
            if !names.insert(ch_cfg.name.as_str()) {
                bail!("channel {:?} is declared more than once", ch_cfg.name);
            }
            check_num(ch_cfg.rate_hz, 1e-3..1e7)
                .with_context(|| format!("invalid sample rate of {:?}", ch_cfg.name))?;
        }

        if self.channel(&self.region.channel).is_none() {
            bail!("region channel {:?} is not declared", self.region.channel);
        }
        if self.channel(&self.sync.basis).is_none() {
            bail!("basis channel {:?} is not declared", self.sync.basis);
        }

        check_num(self.synth.duration_s, 0.1..3600.0).context("invalid synthetic duration")?;
        check_num(self.synth.n_folders, 1..1000).context("invalid number of synthetic folders")?;

        Ok(())
    }
}
