//! Switchyard CLI Application
//!
//! Plays a network stream through mpv and yields the speakers to a
//! Bluetooth phone whenever the stream has something to say.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use switchyard_core::domain::{
    ConfigManager, ConfigWatcher, MediaController, MediaHub, MediaSource, StreamBackend,
    StreamPlayer, SwitchyardConfig, VolumeCoalescer, WirelessPlayer,
};
use switchyard_infra::audio::AmixerOutput;
use switchyard_infra::bluetooth::BluezBackend;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Arbitrates speaker output between a network stream and a Bluetooth player", long_about = None)]
struct Cli {
    /// Stream URI to play
    #[arg(long)]
    uri: Option<String>,

    /// Stream preset, built-in (`op25`) or from the config file
    #[arg(short = 'c', long)]
    preset: Option<String>,

    /// Master volume while the stream plays (1-100, 0 disables)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    amplify: Option<u8>,

    /// Milliseconds of silence before the stream counts as inactive
    #[arg(short = 't', long)]
    inactivity_threshold: Option<u64>,

    /// Request a fullscreen window from a graphical shell
    #[arg(short, long)]
    fullscreen: bool,

    /// Keep the Bluetooth player running while the stream is active
    #[arg(long)]
    no_yield: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut SwitchyardConfig) {
        if let Some(uri) = &self.uri {
            config.stream.uri = Some(uri.clone());
        }
        if let Some(preset) = &self.preset {
            config.stream.preset = Some(preset.clone());
        }
        if let Some(amplify) = self.amplify {
            config.switcher.amplify_volume = amplify;
        }
        if let Some(threshold) = self.inactivity_threshold {
            config.stream.inactivity_threshold_ms = threshold;
        }
        if self.fullscreen {
            config.ui.fullscreen = true;
        }
        if self.no_yield {
            config.switcher.should_yield = false;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn launch_stream_backend(config: &SwitchyardConfig, args: Vec<String>) -> anyhow::Result<Box<dyn StreamBackend>> {
    use switchyard_infra::audio::{MpvBackend, MpvConfig};

    let backend = MpvBackend::launch(MpvConfig::new(&config.stream.mpv_path, args))
        .await
        .context("failed to start mpv")?;
    Ok(Box::new(backend))
}

#[cfg(not(unix))]
async fn launch_stream_backend(_config: &SwitchyardConfig, _args: Vec<String>) -> anyhow::Result<Box<dyn StreamBackend>> {
    anyhow::bail!("the mpv stream backend needs a Unix domain socket")
}

/// Attach to BlueZ off the async runtime.
///
/// Failures are only logged at debug level; the hub warns once about the
/// missing wireless source.
async fn connect_wireless() -> Option<Arc<WirelessPlayer>> {
    let backend = match tokio::task::spawn_blocking(BluezBackend::connect).await {
        Ok(Ok(backend)) => backend,
        Ok(Err(e)) => {
            debug!(error = %e, "Bluetooth unavailable");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "Bluetooth connection task failed");
            return None;
        }
    };
    match WirelessPlayer::new(Box::new(backend)) {
        Ok(player) => Some(player),
        Err(e) => {
            debug!(error = %e, "Failed to subscribe to Bluetooth properties");
            None
        }
    }
}

/// Reapply runtime settings whenever the config file changes
async fn watch_config(manager: ConfigManager, hub: Weak<MediaHub>) {
    let watcher = match ConfigWatcher::new(manager.config_path().to_path_buf()).await {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "Config hot-reload disabled");
            return;
        }
    };
    let mut changes = watcher.subscribe();

    while changes.recv().await.is_ok() {
        // Coalesce the burst of events a single save produces
        tokio::time::sleep(Duration::from_millis(100)).await;
        while changes.try_recv().is_ok() {}

        let Some(hub) = hub.upgrade() else {
            break;
        };
        match manager.reload().await {
            Ok(config) => {
                config.apply_runtime_settings(&hub);
                info!("Config reloaded");
            }
            Err(e) => error!(error = %e, "Ignoring invalid config change"),
        }
    }
    debug!("Config watcher stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("Switchyard starting...");

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(ConfigManager::default_config_dir()?),
    };
    let mut config = manager.load().await;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let uri = config
        .stream
        .uri
        .clone()
        .context("no stream URI given on the command line or in the config file")?;
    let preset_args = match &config.stream.preset {
        Some(name) => config.preset_args(name).unwrap_or_else(|e| {
            warn!(error = %e, "Unknown preset, starting without decoder arguments");
            Vec::new()
        }),
        None => Vec::new(),
    };
    if config.ui.fullscreen {
        debug!("Fullscreen requested; no graphical shell attached");
    }

    let (coalescer, worker) = VolumeCoalescer::new(
        Box::new(AmixerOutput::new(config.mixer.control.clone())),
        config.mixer.curve.build(),
    );
    let _mixer_thread = worker.spawn().context("failed to start the mixer worker")?;

    let backend = launch_stream_backend(&config, preset_args).await?;
    let stream = StreamPlayer::new(uri, backend, config.activity_settings(), Handle::current())?;
    let wireless = connect_wireless().await;

    let hub = MediaHub::new(stream.clone(), wireless, coalescer, config.hub_settings());

    stream.set_mute(config.stream.muted);
    stream.set_volume(config.stream.volume);
    if !stream.play() {
        hub.dispose_media_players();
        anyhow::bail!("stream {} could not be started", stream.uri());
    }

    tokio::spawn(watch_config(manager, Arc::downgrade(&hub)));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    hub.dispose_media_players();

    Ok(())
}
