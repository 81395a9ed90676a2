//! Wireless (Bluetooth AVRCP) source
//!
//! [`WirelessPlayer`] forwards transport commands to a [`WirelessBackend`]
//! and decodes the backend's property-change batches into observer
//! notifications.

use crate::domain::observer::{MediaEvent, MediaObserver, ObserverRegistry};
use crate::domain::source::{self, MediaSource, PropertiesChanged, SourceKind, WirelessBackend};
use crate::domain::track::{Status, Track, WirelessProperty};
use crate::domain::volume::Volume;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, trace, warn};

/// Object path prefix of every BlueZ object
pub const BLUEZ_PATH_PREFIX: &str = "/org/bluez";

/// The secondary, event-driven source
pub struct WirelessPlayer {
    backend: Mutex<Option<Box<dyn WirelessBackend>>>,
    observers: ObserverRegistry<dyn MediaObserver>,
    last_track: Mutex<Option<Track>>,
    last_status: Mutex<Option<Status>>,
    playing: AtomicBool,
}

impl WirelessPlayer {
    /// Wrap `backend` and subscribe to its property changes
    pub fn new(backend: Box<dyn WirelessBackend>) -> source::Result<Arc<Self>> {
        let player = Arc::new(Self {
            backend: Mutex::new(None),
            observers: ObserverRegistry::new(),
            last_track: Mutex::new(None),
            last_status: Mutex::new(None),
            playing: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&player);
        backend.subscribe_properties(Arc::new(move |changed| {
            if let Some(player) = weak.upgrade() {
                player.handle_properties_changed(changed);
            }
        }))?;

        if let Ok(mut slot) = player.backend.lock() {
            *slot = Some(backend);
        }
        info!("Wireless player created");
        Ok(player)
    }

    /// Decode one property-change batch and notify observers.
    ///
    /// Signals from outside the BlueZ object tree are ignored. A property
    /// that fails to decode is logged and skipped; the rest of the batch is
    /// still processed.
    pub fn handle_properties_changed(&self, changed: PropertiesChanged) {
        if !changed.path.contains(BLUEZ_PATH_PREFIX) {
            trace!(path = %changed.path, "Ignoring foreign property change");
            return;
        }

        for (name, value) in &changed.changed {
            match WirelessProperty::decode(name, value) {
                Ok(Some(WirelessProperty::Track(track))) => self.track_changed(track),
                Ok(Some(WirelessProperty::Status(status))) => self.status_changed(status),
                Ok(Some(WirelessProperty::Volume(volume))) => {
                    debug!(%volume, "Wireless volume changed");
                    self.observers.notify(&MediaEvent::VolumeChanged(volume));
                }
                Ok(None) => trace!(property = %name, "Untracked wireless property"),
                Err(e) => warn!(
                    path = %changed.path,
                    property = %name,
                    error = %e,
                    "Failed to decode wireless property"
                ),
            }
        }
    }

    fn track_changed(&self, track: Track) {
        {
            let Ok(mut last) = self.last_track.lock() else {
                return;
            };
            if last.as_ref() == Some(&track) {
                return;
            }
            *last = Some(track.clone());
        }
        debug!(%track, "Wireless track changed");
        self.observers.notify(&MediaEvent::TrackChanged(track));
    }

    fn status_changed(&self, status: Status) {
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status);
        }

        let edge = match status {
            Status::Playing => Some(true),
            Status::Paused | Status::Stopped => Some(false),
            _ => None,
        }
        .filter(|&playing| self.playing.swap(playing, Ordering::AcqRel) != playing);

        debug!(%status, "Wireless status changed");
        self.observers.notify(&MediaEvent::StatusChanged(status));

        match edge {
            Some(true) => self.observers.notify(&MediaEvent::Activated(SourceKind::Wireless)),
            Some(false) => self.observers.notify(&MediaEvent::Inactivated(SourceKind::Wireless)),
            None => {}
        }
    }

    /// Last track reported by the device
    pub fn track(&self) -> Option<Track> {
        self.last_track.lock().ok().and_then(|track| track.clone())
    }

    /// Last transport status reported by the device
    pub fn status(&self) -> Option<Status> {
        self.last_status.lock().ok().and_then(|status| *status)
    }

    pub fn is_disposed(&self) -> bool {
        self.backend.lock().map(|b| b.is_none()).unwrap_or(true)
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

    fn command<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&dyn WirelessBackend) -> source::Result<()>,
    {
        let Ok(guard) = self.backend.lock() else {
            return false;
        };
        let Some(backend) = guard.as_deref() else {
            return false;
        };
        if !backend.has_player() {
            debug!(command = name, "No wireless player connected");
            return false;
        }
        match f(backend) {
            Ok(()) => true,
            Err(e) => {
                warn!(command = name, error = %e, "Wireless command failed");
                false
            }
        }
    }
}

impl MediaSource for WirelessPlayer {
    fn kind(&self) -> SourceKind {
        SourceKind::Wireless
    }

    fn play(&self) -> bool {
        self.command("play", |backend| backend.play())
    }

    fn pause(&self) -> bool {
        self.command("pause", |backend| backend.pause())
    }

    fn stop(&self) -> bool {
        self.command("stop", |backend| backend.stop())
    }

    fn next(&self) -> bool {
        self.command("next", |backend| backend.next())
    }

    fn previous(&self) -> bool {
        self.command("previous", |backend| backend.previous())
    }

    fn is_playing(&self) -> bool {
        let has_player = self
            .backend
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|backend| backend.has_player()))
            .unwrap_or(false);
        has_player && self.playing.load(Ordering::Acquire)
    }

    // The device owns its volume; it is only ever reported, never set
    fn set_volume(&self, _volume: Volume) -> bool {
        false
    }

    fn dispose(&self) {
        let backend = match self.backend.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(backend) = backend {
            backend.close();
            self.playing.store(false, Ordering::Release);
            info!("Wireless player disposed");
        }
    }
}
