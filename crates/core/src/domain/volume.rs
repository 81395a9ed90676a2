//! Output volume values and the coalescing hardware writer
//!
//! Several producers (the switcher, a UI, wireless device reports) may ask for
//! a new master volume at nearly the same time. [`VolumeCoalescer`] keeps a
//! single pending request and hands it to one [`MixerWorker`], which is the
//! only code that ever touches the physical mixer.

use crate::domain::mixer::{ControlRange, MasterOutput};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Output level as an integer percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i32", into = "u8")]
pub struct Volume(u8);

impl Volume {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;

    /// Highest absolute volume a wireless (AVRCP) device reports
    pub const NATIVE_MAX: u16 = 0x7f;

    /// Create from a percentage, clamped to 0..=100
    pub fn new(percent: i32) -> Self {
        Self(percent.clamp(Self::MIN as i32, Self::MAX as i32) as u8)
    }

    /// Create from a fraction in 0.0..=1.0
    pub fn from_fraction(fraction: f32) -> Self {
        if fraction.is_nan() {
            return Self(Self::MIN);
        }
        Self::new((fraction * 100.0).round() as i32)
    }

    /// Convert a device absolute volume (0..=0x7f) by linear proportion
    pub fn from_native(raw: u16) -> Self {
        let percent = raw as u32 * Self::MAX as u32 / Self::NATIVE_MAX as u32;
        Self::new(percent.min(Self::MAX as u32) as i32)
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    pub fn as_fraction(&self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl From<i32> for Volume {
    fn from(percent: i32) -> Self {
        Self::new(percent)
    }
}

impl From<Volume> for u8 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a linear volume onto a control's native range
pub trait VolumeCurve: Send + Sync {
    fn map(&self, volume: Volume, range: ControlRange) -> f32;
}

/// Perceptual correction: `(ln(f) + ln(base)) / ln(base)` of the fraction
/// `f`, clamped to the range. The default base of 64 is empirical.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogCurve {
    base: f32,
}

impl LogCurve {
    pub const DEFAULT_BASE: f32 = 64.0;

    pub fn with_base(base: f32) -> Self {
        Self { base }
    }
}

impl Default for LogCurve {
    fn default() -> Self {
        Self::with_base(Self::DEFAULT_BASE)
    }
}

impl VolumeCurve for LogCurve {
    fn map(&self, volume: Volume, range: ControlRange) -> f32 {
        let fraction = volume.as_fraction();
        if fraction <= 0.0 {
            return range.min;
        }
        let log_base = self.base.ln();
        let adjusted = ((fraction.ln() + log_base) / log_base).clamp(0.0, 1.0);
        range.min + adjusted * range.span()
    }
}

/// Straight proportional mapping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearCurve;

impl VolumeCurve for LinearCurve {
    fn map(&self, volume: Volume, range: ControlRange) -> f32 {
        range.min + volume.percent() as f32 * range.span() / Volume::MAX as f32
    }
}

const EMPTY: u16 = u16::MAX;

/// Single-slot register shared by the coalescer handles and the worker
struct PendingSlot {
    volume: CachePadded<AtomicU16>,
    committing: AtomicBool,
}

/// Producer handle for master volume writes.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct VolumeCoalescer {
    slot: Arc<PendingSlot>,
    wake: Sender<()>,
}

impl VolumeCoalescer {
    /// Create a coalescer and the worker that owns `output`
    pub fn new(output: Box<dyn MasterOutput>, curve: Box<dyn VolumeCurve>) -> (Self, MixerWorker) {
        let slot = Arc::new(PendingSlot {
            volume: CachePadded::new(AtomicU16::new(EMPTY)),
            committing: AtomicBool::new(false),
        });
        // Capacity 1: one outstanding wake-up covers any number of requests.
        let (wake_tx, wake_rx) = bounded(1);

        let coalescer = Self {
            slot: slot.clone(),
            wake: wake_tx,
        };
        let worker = MixerWorker {
            slot,
            wake: wake_rx,
            output,
            curve,
        };
        (coalescer, worker)
    }

    /// Queue `volume` for the master output, evicting any request that has
    /// not started committing yet.
    pub fn request_set(&self, volume: Volume) {
        let previous = self
            .slot
            .volume
            .swap(volume.percent() as u16, Ordering::AcqRel);
        if previous != EMPTY {
            debug!(superseded = previous, %volume, "Dropped superseded volume request");
        } else {
            trace!(%volume, "Volume request queued");
        }
        // A full channel means a wake-up is already pending.
        let _ = self.wake.try_send(());
    }

    /// Volume waiting to be committed, if any
    pub fn pending(&self) -> Option<Volume> {
        match self.slot.volume.load(Ordering::Acquire) {
            EMPTY => None,
            raw => Some(Volume::new(raw as i32)),
        }
    }

    /// Whether the worker is currently writing to the hardware
    pub fn is_committing(&self) -> bool {
        self.slot.committing.load(Ordering::Acquire)
    }
}

/// The only writer of the physical master output
pub struct MixerWorker {
    slot: Arc<PendingSlot>,
    wake: Receiver<()>,
    output: Box<dyn MasterOutput>,
    curve: Box<dyn VolumeCurve>,
}

impl MixerWorker {
    /// Commit the pending request, if there is one.
    ///
    /// Returns the volume written to the hardware; `None` when nothing was
    /// pending or the write was dropped.
    pub fn commit_pending(&mut self) -> Option<Volume> {
        self.slot.committing.store(true, Ordering::Release);
        let raw = self.slot.volume.swap(EMPTY, Ordering::AcqRel);
        let committed = if raw == EMPTY {
            None
        } else {
            let volume = Volume::new(raw as i32);
            self.commit(volume).then_some(volume)
        };
        self.slot.committing.store(false, Ordering::Release);
        committed
    }

    fn commit(&mut self, volume: Volume) -> bool {
        let name = self.output.name().to_string();
        let mut control = match self.output.open() {
            Ok(control) => control,
            Err(e) => {
                warn!(control = %name, %volume, error = %e, "Could not acquire master control, dropping volume request");
                return false;
            }
        };

        let range = control.range();
        let target = range.clamp(self.curve.map(volume, range));
        match control.set_value(target) {
            Ok(()) => {
                debug!(control = %name, %volume, target, "Master volume committed");
                true
            }
            Err(e) => {
                warn!(control = %name, %volume, error = %e, "Failed to set master volume");
                false
            }
        }
    }

    /// Commit requests until every [`VolumeCoalescer`] handle is dropped
    pub fn run(mut self) {
        info!(control = self.output.name(), "Mixer worker started");
        while self.wake.recv().is_ok() {
            self.commit_pending();
        }
        info!("Mixer worker stopped");
    }

    /// Run the worker on its own named thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("volume-mixer".to_string())
            .spawn(move || self.run())
    }
}
