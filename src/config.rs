//! Configuration management for the livechat sync agent

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resolver::ChannelRef;
use crate::sync::SessionSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// obs-websocket connection
    #[serde(default)]
    pub obs: ObsConfig,

    /// Channel to follow
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Browser source to drive
    #[serde(default)]
    pub source: SourceConfig,

    /// Cross-device share log
    #[serde(default)]
    pub share: ShareConfig,

    /// Retry and timer intervals
    #[serde(default)]
    pub timing: TimingConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,

    #[serde(default = "default_obs_port")]
    pub port: u16,

    /// obs-websocket password, if authentication is enabled
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// `@handle`, channel id, or channel URL
    #[serde(default)]
    pub input: String,

    /// YouTube Data API key; enables the API fallback during acquisition
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name of the OBS browser source showing the chat
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Name of this device, used for the share log file name
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// `.jsonl` file or directory this device appends to
    #[serde(default)]
    pub write_path: Option<PathBuf>,

    /// Peer `.jsonl` file, or a directory to search for one
    #[serde(default)]
    pub read_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_base_init_interval")]
    pub base_init_interval_secs: u64,

    #[serde(default = "default_min_init_interval")]
    pub min_init_interval_ms: u64,

    #[serde(default = "default_max_init_interval")]
    pub max_init_interval_secs: u64,

    #[serde(default = "default_max_init_attempts")]
    pub max_init_attempts: u32,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Host loop tick for the dispatcher
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,

    /// How long session stop waits for background workers
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,

    /// Consecutive "not live" probes before the refresh nudge escalates
    #[serde(default = "default_miss_escalation_threshold")]
    pub miss_escalation_threshold: u32,
}

// Default value functions
fn default_obs_host() -> String {
    "localhost".to_string()
}

fn default_obs_port() -> u16 {
    4455
}

fn default_device_name() -> String {
    "PC1".to_string()
}

fn default_base_init_interval() -> u64 {
    1
}

fn default_min_init_interval() -> u64 {
    500
}

fn default_max_init_interval() -> u64 {
    23
}

fn default_max_init_attempts() -> u32 {
    3
}

fn default_monitor_interval() -> u64 {
    12
}

fn default_update_interval() -> u64 {
    23
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    23
}

fn default_dispatch_interval() -> u64 {
    33
}

fn default_join_timeout() -> u64 {
    2000
}

fn default_miss_escalation_threshold() -> u32 {
    3
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            write_path: None,
            read_path: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_init_interval_secs: default_base_init_interval(),
            min_init_interval_ms: default_min_init_interval(),
            max_init_interval_secs: default_max_init_interval(),
            max_init_attempts: default_max_init_attempts(),
            monitor_interval_secs: default_monitor_interval(),
            update_interval_secs: default_update_interval(),
            refresh_interval_secs: default_refresh_interval(),
            probe_timeout_secs: default_probe_timeout(),
            dispatch_interval_ms: default_dispatch_interval(),
            join_timeout_ms: default_join_timeout(),
            miss_escalation_threshold: default_miss_escalation_threshold(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} = {value} is outside {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("channel.input {0:?} is not a channel handle, id, or URL")]
    Channel(String),
}

fn check_range(
    key: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("timing.base_init_interval_secs", self.base_init_interval_secs, 1..=60)?;
        check_range("timing.min_init_interval_ms", self.min_init_interval_ms, 50..=60_000)?;
        check_range("timing.max_init_interval_secs", self.max_init_interval_secs, 3..=300)?;
        check_range("timing.max_init_attempts", self.max_init_attempts.into(), 1..=20)?;
        check_range("timing.monitor_interval_secs", self.monitor_interval_secs, 1..=300)?;
        check_range("timing.update_interval_secs", self.update_interval_secs, 10..=300)?;
        check_range("timing.refresh_interval_secs", self.refresh_interval_secs, 1..=300)?;
        check_range("timing.probe_timeout_secs", self.probe_timeout_secs, 1..=120)?;
        check_range("timing.dispatch_interval_ms", self.dispatch_interval_ms, 5..=1000)?;
        check_range("timing.join_timeout_ms", self.join_timeout_ms, 100..=30_000)?;
        check_range(
            "timing.miss_escalation_threshold",
            self.miss_escalation_threshold.into(),
            1..=20,
        )
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;

            config.config_path = Some(path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "livechat-sync", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Check required values and numeric bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.input.trim().is_empty() {
            return Err(ConfigError::Missing("channel.input"));
        }
        if ChannelRef::parse(&self.channel.input).is_none() {
            return Err(ConfigError::Channel(self.channel.input.clone()));
        }
        if self.source.name.trim().is_empty() {
            return Err(ConfigError::Missing("source.name"));
        }
        if self.share.device_name.trim().is_empty() {
            return Err(ConfigError::Missing("share.device_name"));
        }
        self.timing.validate()
    }

    /// Engine settings for a validated config
    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        self.validate()?;
        let channel = ChannelRef::parse(&self.channel.input)
            .ok_or_else(|| ConfigError::Channel(self.channel.input.clone()))?;
        let timing = &self.timing;

        Ok(SessionSettings {
            channel,
            device_name: self.share.device_name.trim().to_string(),
            write_path: self.share.write_path.clone(),
            read_path: self.share.read_path.clone(),
            base_interval: Duration::from_secs(timing.base_init_interval_secs),
            min_interval: Duration::from_millis(timing.min_init_interval_ms),
            max_interval: Duration::from_secs(timing.max_init_interval_secs),
            max_attempts: timing.max_init_attempts,
            monitor_interval: Duration::from_secs(timing.monitor_interval_secs),
            update_interval: Duration::from_secs(timing.update_interval_secs),
            refresh_interval: Duration::from_secs(timing.refresh_interval_secs),
            probe_timeout: Duration::from_secs(timing.probe_timeout_secs),
            join_timeout: Duration::from_millis(timing.join_timeout_ms),
            miss_threshold: timing.miss_escalation_threshold,
        })
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.timing.dispatch_interval_ms)
    }
}
