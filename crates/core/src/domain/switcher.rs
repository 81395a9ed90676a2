//! Source arbitration
//!
//! The [`MediaSwitcher`] listens to both sources. When the stream comes
//! alive it pauses the wireless player and, if amplification is configured,
//! raises the master output; when the stream goes quiet it undoes both.

use crate::domain::controller::MediaController;
use crate::domain::observer::MediaObserver;
use crate::domain::source::{MediaSource, SourceKind};
use crate::domain::volume::{Volume, VolumeCoalescer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Arbitrates between the stream and the wireless source
pub struct MediaSwitcher {
    controller: Weak<dyn MediaController>,
    coalescer: VolumeCoalescer,
    should_yield: AtomicBool,
    last_volume: Mutex<Option<Volume>>,
}

impl MediaSwitcher {
    pub fn new(
        controller: Weak<dyn MediaController>,
        coalescer: VolumeCoalescer,
        should_yield: bool,
    ) -> Self {
        Self {
            controller,
            coalescer,
            should_yield: AtomicBool::new(should_yield),
            last_volume: Mutex::new(None),
        }
    }

    /// Whether the wireless source yields to the stream. Applies from the
    /// next transition on.
    pub fn set_should_yield(&self, should_yield: bool) {
        let previous = self.should_yield.swap(should_yield, Ordering::AcqRel);
        if previous != should_yield {
            info!(should_yield, "Switcher yield policy changed");
        }
    }

    pub fn should_yield(&self) -> bool {
        self.should_yield.load(Ordering::Acquire)
    }

    /// Last volume reported by the wireless device
    pub fn last_volume(&self) -> Option<Volume> {
        self.last_volume.lock().ok().and_then(|volume| *volume)
    }

    /// The controller and its wireless source, when both sources exist and
    /// yielding is enabled
    fn yielding_sources(&self) -> Option<(Arc<dyn MediaController>, Arc<dyn MediaSource>)> {
        if !self.should_yield() {
            return None;
        }
        let controller = self.controller.upgrade()?;
        controller.stream_source()?;
        let wireless = controller.wireless_source()?;
        Some((controller, wireless))
    }

    fn amplify_target(&self, controller: &dyn MediaController) -> Option<u8> {
        match controller.amplify_volume() {
            0 => None,
            amplify => self.last_volume().map(|_| amplify),
        }
    }
}

impl MediaObserver for MediaSwitcher {
    fn on_activated(&self, source: SourceKind) {
        if source != SourceKind::Stream {
            return;
        }
        let Some((controller, wireless)) = self.yielding_sources() else {
            return;
        };

        info!("Stream active, pausing wireless source");
        wireless.pause();

        if let Some(amplify) = self.amplify_target(controller.as_ref()) {
            debug!(amplify, "Applying amplification volume");
            self.coalescer.request_set(Volume::new(amplify as i32));
        }
    }

    fn on_inactivated(&self, source: SourceKind) {
        if source != SourceKind::Stream {
            return;
        }
        let Some((controller, wireless)) = self.yielding_sources() else {
            return;
        };

        info!("Stream inactive, resuming wireless source");
        wireless.play();

        if self.amplify_target(controller.as_ref()).is_some() {
            if let Some(volume) = self.last_volume() {
                debug!(%volume, "Restoring wireless volume");
                self.coalescer.request_set(volume);
            }
        }
    }

    fn on_volume_changed(&self, volume: Volume) {
        if let Ok(mut last) = self.last_volume.lock() {
            *last = Some(volume);
        }
    }
}
