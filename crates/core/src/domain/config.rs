//! Configuration management for Switchyard
//!
//! This module provides:
//! - Configuration structs for the stream, the switcher and the mixer
//! - Built-in and user-defined stream presets
//! - Loading and saving with TOML serialization
//! - Hot-reload support via file system watcher

use crate::domain::activity::ActivitySettings;
use crate::domain::controller::{HubSettings, MediaController, MediaHub};
use crate::domain::volume::{LinearCurve, LogCurve, Volume, VolumeCurve};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

/// Presets shipped with the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPreset {
    /// Raw 8 kHz mono audio as produced by an OP25 P25 receiver
    Op25,
}

impl StreamPreset {
    pub const ALL: [StreamPreset; 1] = [StreamPreset::Op25];

    pub fn name(&self) -> &'static str {
        match self {
            StreamPreset::Op25 => "op25",
        }
    }

    /// Extra decoder arguments
    pub fn args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            StreamPreset::Op25 => &[
                "--cache=no",
                "--demuxer=rawaudio",
                "--demuxer-rawaudio-channels=1",
                "--demuxer-rawaudio-rate=8000",
            ],
        };
        args.iter().map(|arg| arg.to_string()).collect()
    }
}

impl FromStr for StreamPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::PresetNotFound(s.to_string()))
    }
}

impl fmt::Display for StreamPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stream source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream URI; the CLI may supply it instead
    pub uri: Option<String>,

    /// Preset name, built-in or from `[presets]`
    pub preset: Option<String>,

    /// Silence after which the stream counts as inactive
    pub inactivity_threshold_ms: u64,

    /// Watchdog polling period
    pub poll_interval_ms: u64,

    /// Stream volume restored on every activation
    pub volume: Volume,

    pub muted: bool,

    /// mpv executable
    pub mpv_path: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            uri: None,
            preset: None,
            inactivity_threshold_ms: ActivitySettings::DEFAULT_INACTIVITY_THRESHOLD.as_millis() as u64,
            poll_interval_ms: ActivitySettings::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            volume: Volume::new(100),
            muted: false,
            mpv_path: PathBuf::from("mpv"),
        }
    }
}

/// Arbitration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherConfig {
    pub should_yield: bool,

    /// Master volume while the stream plays (0 = disabled)
    pub amplify_volume: u8,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        let hub = HubSettings::default();
        Self {
            should_yield: hub.should_yield,
            amplify_volume: hub.amplify_volume,
        }
    }
}

/// Mapping from linear volume to the mixer's native range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    #[default]
    Log,
    Linear,
}

impl CurveKind {
    pub fn build(&self) -> Box<dyn VolumeCurve> {
        match self {
            CurveKind::Log => Box::new(LogCurve::default()),
            CurveKind::Linear => Box::new(LinearCurve),
        }
    }
}

/// Physical mixer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Simple mixer control to drive
    pub control: String,
    pub curve: CurveKind,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            control: "Master".to_string(),
            curve: CurveKind::default(),
        }
    }
}

/// Display options, carried for a graphical shell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub fullscreen: bool,
}

/// User-defined stream preset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub args: Vec<String>,
}

/// Complete Switchyard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub stream: StreamConfig,
    pub switcher: SwitcherConfig,
    pub mixer: MixerConfig,
    pub ui: UiConfig,
    pub presets: BTreeMap<String, PresetConfig>,
}

impl SwitchyardConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Factory default written on first run
    pub fn factory_default() -> Self {
        let mut config = Self::default();
        config.presets.insert(
            "low-latency".to_string(),
            PresetConfig {
                args: vec!["--cache=no".to_string(), "--untimed".to_string()],
            },
        );
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.inactivity_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream.inactivity_threshold_ms must be greater than zero".to_string(),
            ));
        }
        if self.stream.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.switcher.amplify_volume > Volume::MAX {
            return Err(ConfigError::Invalid(format!(
                "switcher.amplify_volume must be at most {}",
                Volume::MAX
            )));
        }
        if self.mixer.control.trim().is_empty() {
            return Err(ConfigError::Invalid("mixer.control must not be empty".to_string()));
        }
        Ok(())
    }

    /// Decoder arguments for a preset name.
    ///
    /// User presets shadow built-in ones; names are case-insensitive.
    pub fn preset_args(&self, name: &str) -> Result<Vec<String>> {
        if let Some(preset) = self
            .presets
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, preset)| preset)
        {
            return Ok(preset.args.clone());
        }
        Ok(name.parse::<StreamPreset>()?.args())
    }

    pub fn activity_settings(&self) -> ActivitySettings {
        ActivitySettings {
            inactivity_threshold: Duration::from_millis(self.stream.inactivity_threshold_ms),
            poll_interval: Duration::from_millis(self.stream.poll_interval_ms),
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            should_yield: self.switcher.should_yield,
            amplify_volume: self.switcher.amplify_volume,
        }
    }

    /// Push the settings that can change while running into `hub`
    pub fn apply_runtime_settings(&self, hub: &MediaHub) {
        if let Some(switcher) = hub.switcher() {
            switcher.set_should_yield(self.switcher.should_yield);
        }
        hub.set_amplify_volume(self.switcher.amplify_volume);
        if let Some(stream) = hub.stream_player() {
            stream.set_inactivity_threshold(Duration::from_millis(
                self.stream.inactivity_threshold_ms,
            ));
        }
        debug!("Runtime settings applied");
    }
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `config_path` for changes
    pub async fn new(config_path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        // Editors replace files, so watch the directory
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::Invalid(format!("{} has no parent", config_path.display())))?;
        fs::create_dir_all(&config_dir).await?;

        let file_name = config_path.file_name().map(|name| name.to_os_string());
        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.file_name().map(|name| name.to_os_string()) == file_name {
                            if let Err(e) = tx_clone.send(path) {
                                debug!("No listener for config change event: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&config_dir, notify::RecursiveMode::NonRecursive)?;

        info!(
            path = %config_path.display(),
            "Config watcher started"
        );

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Configuration manager for the main Switchyard config
///
/// Manages the configuration file at `~/.config/switchyard/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Manager for an explicit config file
    pub fn with_path(config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/switchyard` on Linux
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("switchyard"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns the factory default.
    /// If the config file is corrupt, backs it up and returns the factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> SwitchyardConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = SwitchyardConfig::factory_default();
            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match SwitchyardConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                match fs::copy(&self.config_path, &backup_path).await {
                    Ok(_) => warn!(path = %backup_path.display(), "Corrupt config backed up"),
                    Err(copy_err) => error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    ),
                }

                SwitchyardConfig::factory_default()
            }
        }
    }

    /// Re-read the file without falling back to defaults
    pub async fn reload(&self) -> Result<SwitchyardConfig> {
        SwitchyardConfig::load_from_file(&self.config_path).await
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &SwitchyardConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
