//! Controller façade
//!
//! Outer shells (CLI, a future GUI) reach the two sources and the switcher
//! through [`MediaController`]. [`MediaHub`] is the concrete façade: it owns
//! the players, wires the switcher into both and tears everything down.

use crate::domain::observer::MediaObserver;
use crate::domain::source::MediaSource;
use crate::domain::stream::StreamPlayer;
use crate::domain::switcher::MediaSwitcher;
use crate::domain::volume::VolumeCoalescer;
use crate::domain::wireless::WirelessPlayer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{info, warn};

/// Access point to the media sources
pub trait MediaController: Send + Sync {
    /// The stream source, `None` before creation or after disposal
    fn stream_source(&self) -> Option<Arc<dyn MediaSource>>;

    /// The wireless source, `None` when unsupported or after disposal
    fn wireless_source(&self) -> Option<Arc<dyn MediaSource>>;

    fn switcher(&self) -> Option<Arc<MediaSwitcher>>;

    /// Master volume applied while the stream plays; 0 disables amplification
    fn amplify_volume(&self) -> u8;

    /// Dispose every player. Safe to call more than once.
    fn dispose_media_players(&self);
}

/// Arbitration settings supplied at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub should_yield: bool,
    pub amplify_volume: u8,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            should_yield: true,
            amplify_volume: 0,
        }
    }
}

/// Owns both players and the switcher arbitrating between them
pub struct MediaHub {
    stream: RwLock<Option<Arc<StreamPlayer>>>,
    wireless: RwLock<Option<Arc<WirelessPlayer>>>,
    switcher: Arc<MediaSwitcher>,
    amplify_volume: AtomicU8,
}

impl MediaHub {
    /// Build the hub and register the switcher on every present source.
    ///
    /// A missing wireless player is a supported degraded mode: the stream
    /// keeps working and a single warning is logged.
    pub fn new(
        stream: Arc<StreamPlayer>,
        wireless: Option<Arc<WirelessPlayer>>,
        coalescer: VolumeCoalescer,
        settings: HubSettings,
    ) -> Arc<Self> {
        let hub = Arc::new_cyclic(|weak: &Weak<MediaHub>| {
            let controller: Weak<dyn MediaController> = weak.clone();
            Self {
                stream: RwLock::new(Some(stream)),
                wireless: RwLock::new(wireless),
                switcher: Arc::new(MediaSwitcher::new(
                    controller,
                    coalescer,
                    settings.should_yield,
                )),
                amplify_volume: AtomicU8::new(settings.amplify_volume.min(100)),
            }
        });

        let observer = hub.switcher_observer();
        if let Some(stream) = hub.stream_player() {
            stream.add_observer(observer.clone());
        }
        match hub.wireless_player() {
            Some(wireless) => wireless.add_observer(observer),
            None => warn!("No wireless player available, running with the stream source only"),
        }

        info!(
            should_yield = settings.should_yield,
            amplify_volume = settings.amplify_volume,
            "Media hub ready"
        );
        hub
    }

    fn switcher_observer(&self) -> Arc<dyn MediaObserver> {
        self.switcher.clone()
    }

    pub fn stream_player(&self) -> Option<Arc<StreamPlayer>> {
        self.stream.read().ok().and_then(|stream| stream.clone())
    }

    pub fn wireless_player(&self) -> Option<Arc<WirelessPlayer>> {
        self.wireless.read().ok().and_then(|wireless| wireless.clone())
    }

    pub fn set_amplify_volume(&self, volume: u8) {
        let volume = volume.min(100);
        if self.amplify_volume.swap(volume, Ordering::AcqRel) != volume {
            info!(amplify_volume = volume, "Amplification volume changed");
        }
    }
}

impl MediaController for MediaHub {
    fn stream_source(&self) -> Option<Arc<dyn MediaSource>> {
        self.stream_player().map(|player| player as Arc<dyn MediaSource>)
    }

    fn wireless_source(&self) -> Option<Arc<dyn MediaSource>> {
        self.wireless_player()
            .map(|player| player as Arc<dyn MediaSource>)
    }

    fn switcher(&self) -> Option<Arc<MediaSwitcher>> {
        Some(self.switcher.clone())
    }

    fn amplify_volume(&self) -> u8 {
        self.amplify_volume.load(Ordering::Acquire)
    }

    fn dispose_media_players(&self) {
        let observer = self.switcher_observer();

        let stream = self.stream.write().ok().and_then(|mut slot| slot.take());
        if let Some(stream) = stream {
            stream.remove_observer(&observer);
            stream.dispose();
        }

        let wireless = self.wireless.write().ok().and_then(|mut slot| slot.take());
        if let Some(wireless) = wireless {
            wireless.remove_observer(&observer);
            wireless.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::ActivitySettings;
    use crate::domain::mixer::{self, MasterOutput, MixerControl, MixerError};
    use crate::domain::source::{self, HeartbeatHandler, PropertiesHandler, StreamBackend, WirelessBackend};
    use crate::domain::volume::{LogCurve, Volume};
    use std::sync::atomic::AtomicUsize;
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct Releases(AtomicUsize);

    struct NullStream(Arc<Releases>);

    impl StreamBackend for NullStream {
        fn subscribe_heartbeat(&self, _handler: HeartbeatHandler) -> source::Result<()> {
            Ok(())
        }

        fn play(&self, _uri: &str) -> source::Result<()> {
            Ok(())
        }

        fn pause(&self) -> source::Result<()> {
            Ok(())
        }

        fn stop(&self) -> source::Result<()> {
            Ok(())
        }

        fn is_playing(&self) -> source::Result<bool> {
            Ok(false)
        }

        fn set_mute(&self, _muted: bool) -> source::Result<()> {
            Ok(())
        }

        fn is_muted(&self) -> source::Result<bool> {
            Ok(false)
        }

        fn set_volume(&self, _volume: Volume) -> source::Result<()> {
            Ok(())
        }

        fn volume(&self) -> source::Result<Volume> {
            Ok(Volume::new(50))
        }

        fn release(&self) {
            self.0 .0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullWireless(Arc<Releases>);

    impl WirelessBackend for NullWireless {
        fn subscribe_properties(&self, _handler: PropertiesHandler) -> source::Result<()> {
            Ok(())
        }

        fn has_player(&self) -> bool {
            true
        }

        fn play(&self) -> source::Result<()> {
            Ok(())
        }

        fn pause(&self) -> source::Result<()> {
            Ok(())
        }

        fn stop(&self) -> source::Result<()> {
            Ok(())
        }

        fn next(&self) -> source::Result<()> {
            Ok(())
        }

        fn previous(&self) -> source::Result<()> {
            Ok(())
        }

        fn close(&self) {
            self.0 .0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoMixer;

    impl MasterOutput for NoMixer {
        fn name(&self) -> &str {
            "none"
        }

        fn open(&mut self) -> mixer::Result<Box<dyn MixerControl + '_>> {
            Err(MixerError::ControlNotFound("none".to_string()))
        }
    }

    fn hub(with_wireless: bool, releases: &Arc<Releases>) -> Arc<MediaHub> {
        let stream = StreamPlayer::new(
            "udp://0.0.0.0:9000",
            Box::new(NullStream(releases.clone())),
            ActivitySettings::default(),
            Handle::current(),
        )
        .unwrap();
        let wireless = with_wireless
            .then(|| WirelessPlayer::new(Box::new(NullWireless(releases.clone()))).unwrap());
        let (coalescer, _worker) = VolumeCoalescer::new(Box::new(NoMixer), Box::new(LogCurve::default()));
        MediaHub::new(
            stream,
            wireless,
            coalescer,
            HubSettings {
                should_yield: true,
                amplify_volume: 30,
            },
        )
    }

    #[tokio::test]
    async fn test_switcher_registered_on_both_sources() {
        let releases = Arc::new(Releases::default());
        let hub = hub(true, &releases);

        assert_eq!(hub.stream_player().unwrap().observer_count(), 1);
        assert_eq!(hub.wireless_player().unwrap().observer_count(), 1);
        assert!(hub.switcher().is_some());
        assert_eq!(hub.amplify_volume(), 30);
    }

    #[tokio::test]
    async fn test_degraded_mode_without_wireless() {
        let releases = Arc::new(Releases::default());
        let hub = hub(false, &releases);

        assert!(hub.stream_source().is_some());
        assert!(hub.wireless_source().is_none());
        assert_eq!(hub.stream_player().unwrap().observer_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let releases = Arc::new(Releases::default());
        let hub = hub(true, &releases);
        let stream = hub.stream_player().unwrap();
        let wireless = hub.wireless_player().unwrap();

        hub.dispose_media_players();
        hub.dispose_media_players();

        assert_eq!(releases.0.load(Ordering::SeqCst), 2);
        assert!(hub.stream_source().is_none());
        assert!(hub.wireless_source().is_none());
        assert_eq!(stream.observer_count(), 0);
        assert_eq!(wireless.observer_count(), 0);
        assert!(stream.is_released());
        assert!(wireless.is_disposed());
    }

    #[tokio::test]
    async fn test_amplify_volume_is_clamped() {
        let releases = Arc::new(Releases::default());
        let hub = hub(false, &releases);

        hub.set_amplify_volume(150);
        assert_eq!(hub.amplify_volume(), 100);
        hub.set_amplify_volume(0);
        assert_eq!(hub.amplify_volume(), 0);
    }
}
