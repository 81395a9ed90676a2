//! Network stream source
//!
//! [`StreamPlayer`] wraps a [`StreamBackend`] and turns its position updates
//! into activity edges through an [`ActivityMonitor`].

use crate::domain::activity::{ActivityMonitor, ActivitySettings, ActivityState};
use crate::domain::observer::{MediaObserver, ObserverRegistry};
use crate::domain::source::{self, MediaSource, SourceKind, StreamBackend};
use crate::domain::volume::Volume;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Stream volume percentage applied until a caller picks another one
pub const DEFAULT_STREAM_VOLUME: u8 = 50;

/// The primary, heartbeat-monitored source
pub struct StreamPlayer {
    uri: String,
    backend: Box<dyn StreamBackend>,
    monitor: ActivityMonitor,
    observers: Arc<ObserverRegistry<dyn MediaObserver>>,
    muted: AtomicBool,
    volume: AtomicU8,
    released: AtomicBool,
}

impl StreamPlayer {
    /// Wrap `backend` and subscribe to its heartbeat.
    ///
    /// Watchdogs are spawned on `runtime`.
    pub fn new(
        uri: impl Into<String>,
        backend: Box<dyn StreamBackend>,
        settings: ActivitySettings,
        runtime: Handle,
    ) -> source::Result<Arc<Self>> {
        let observers: Arc<ObserverRegistry<dyn MediaObserver>> = Arc::new(ObserverRegistry::new());
        let monitor = ActivityMonitor::new(SourceKind::Stream, settings, observers.clone(), runtime);

        let player = Arc::new(Self {
            uri: uri.into(),
            backend,
            monitor,
            observers,
            muted: AtomicBool::new(false),
            volume: AtomicU8::new(DEFAULT_STREAM_VOLUME),
            released: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&player);
        player.backend.subscribe_heartbeat(Arc::new(move || {
            if let Some(player) = weak.upgrade() {
                player.on_heartbeat();
            }
        }))?;

        info!(uri = %player.uri, "Stream player created");
        Ok(player)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn on_heartbeat(&self) {
        if self.is_released() {
            return;
        }
        // Disposal may have raced past the check above; the monitor is
        // closed first then, so a late activation is refused.
        if self.monitor.heartbeat() && !self.is_released() {
            self.restore_output();
        }
    }

    /// Bring the backend back to the configured mute and volume
    fn restore_output(&self) {
        let muted = self.muted.load(Ordering::Acquire);
        match self.backend.is_muted() {
            Ok(current) if current != muted => {
                if let Err(e) = self.backend.set_mute(muted) {
                    warn!(error = %e, "Failed to restore stream mute");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read stream mute"),
        }

        let volume = Volume::from(self.volume.load(Ordering::Acquire) as i32);
        match self.backend.volume() {
            Ok(current) if current != volume => {
                if let Err(e) = self.backend.set_volume(volume) {
                    warn!(error = %e, "Failed to restore stream volume");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read stream volume"),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn set_mute(&self, muted: bool) -> bool {
        self.muted.store(muted, Ordering::Release);
        if self.is_released() {
            return false;
        }
        match self.backend.set_mute(muted) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, muted, "Failed to set stream mute");
                false
            }
        }
    }

    /// The configured mute, which the backend is brought back to on every
    /// activation
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Configured stream volume, `None` once released
    pub fn volume(&self) -> Option<Volume> {
        if self.is_released() {
            return None;
        }
        Some(Volume::from(self.volume.load(Ordering::Acquire) as i32))
    }

    pub fn activity(&self) -> ActivityState {
        self.monitor.state()
    }

    pub fn set_inactivity_threshold(&self, threshold: Duration) {
        self.monitor.set_inactivity_threshold(threshold);
    }

    pub fn inactivity_threshold(&self) -> Duration {
        self.monitor.inactivity_threshold()
    }

    /// Force the stream inactive without waiting for the timeout
    pub fn deactivate(&self) -> bool {
        self.monitor.deactivate()
    }

    pub fn add_observer(&self, observer: Arc<dyn MediaObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn MediaObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl MediaSource for StreamPlayer {
    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn play(&self) -> bool {
        if self.is_released() || self.is_playing() {
            return false;
        }
        match self.backend.play(&self.uri) {
            Ok(()) => {
                debug!(uri = %self.uri, "Stream playback requested");
                true
            }
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "Failed to play stream");
                false
            }
        }
    }

    fn pause(&self) -> bool {
        if self.is_released() {
            return false;
        }
        match self.backend.pause() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to pause stream");
                false
            }
        }
    }

    fn stop(&self) -> bool {
        if self.is_released() {
            return false;
        }
        match self.backend.stop() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to stop stream");
                false
            }
        }
    }

    // A live stream has no track list
    fn next(&self) -> bool {
        false
    }

    fn previous(&self) -> bool {
        false
    }

    fn is_playing(&self) -> bool {
        if self.is_released() {
            return false;
        }
        match self.backend.is_playing() {
            Ok(playing) => playing,
            Err(e) => {
                warn!(error = %e, "Failed to query stream state");
                false
            }
        }
    }

    fn set_volume(&self, volume: Volume) -> bool {
        self.volume.store(volume.percent(), Ordering::Release);
        if self.is_released() {
            return false;
        }
        match self.backend.set_volume(volume) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %volume, "Failed to set stream volume");
                false
            }
        }
    }

    fn dispose(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.monitor.close();
        self.backend.release();
        info!(uri = %self.uri, "Stream player disposed");
    }
}
