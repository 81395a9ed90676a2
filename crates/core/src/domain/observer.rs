//! Observer registry and media notification callbacks
//!
//! Sources never know who listens to them. They own an [`ObserverRegistry`]
//! and push [`MediaEvent`]s through it; listeners implement the subset of
//! [`MediaObserver`] they care about.

use crate::domain::source::SourceKind;
use crate::domain::track::{Status, Track};
use crate::domain::volume::Volume;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{error, trace};

/// Callbacks a media source can deliver.
///
/// Every method defaults to a no-op so an observer only overrides what it
/// needs. Callbacks run synchronously on the notifying thread and must not
/// block.
pub trait MediaObserver: Send + Sync {
    /// A source started producing audio.
    fn on_activated(&self, _source: SourceKind) {}

    /// A source stopped producing audio.
    fn on_inactivated(&self, _source: SourceKind) {}

    /// The wireless player switched to a different track.
    fn on_track_changed(&self, _track: &Track) {}

    /// The wireless player reported a new transport status.
    fn on_status_changed(&self, _status: Status) {}

    /// The wireless device reported a new output volume.
    fn on_volume_changed(&self, _volume: Volume) {}
}

/// A single notification routed to [`MediaObserver`] callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Activated(SourceKind),
    Inactivated(SourceKind),
    TrackChanged(Track),
    StatusChanged(Status),
    VolumeChanged(Volume),
}

impl MediaEvent {
    /// Invoke the callback matching this event on `observer`
    pub fn dispatch(&self, observer: &dyn MediaObserver) {
        match self {
            MediaEvent::Activated(source) => observer.on_activated(*source),
            MediaEvent::Inactivated(source) => observer.on_inactivated(*source),
            MediaEvent::TrackChanged(track) => observer.on_track_changed(track),
            MediaEvent::StatusChanged(status) => observer.on_status_changed(*status),
            MediaEvent::VolumeChanged(volume) => observer.on_volume_changed(*volume),
        }
    }
}

/// Insertion-ordered list of observers.
///
/// Notification iterates over a snapshot taken under a short read lock, so
/// observers may be added or removed from any thread (including from inside a
/// callback) while a notification is running.
pub struct ObserverRegistry<O: ?Sized> {
    observers: RwLock<Vec<Arc<O>>>,
}

impl<O: ?Sized> ObserverRegistry<O> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Append an observer. The same observer may be registered twice and
    /// will then be notified twice.
    pub fn add(&self, observer: Arc<O>) {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        observers.push(observer);
        trace!(count = observers.len(), "Observer added");
    }

    /// Remove the first registration of `observer`, compared by identity
    pub fn remove(&self, observer: &Arc<O>) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let position = observers.iter().position(|o| same_observer(o, observer));
        match position {
            Some(index) => {
                observers.remove(index);
                trace!(count = observers.len(), "Observer removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Run `f` for every observer in registration order.
    ///
    /// A panic inside `f` is caught and logged; the remaining observers are
    /// still visited.
    pub fn notify_with<F>(&self, mut f: F)
    where
        F: FnMut(&O),
    {
        let snapshot: Vec<Arc<O>> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for (index, observer) in snapshot.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(observer)));
            if let Err(payload) = outcome {
                error!(
                    observer = index,
                    reason = panic_message(payload.as_ref()),
                    "Observer panicked during notification"
                );
            }
        }
    }
}

impl ObserverRegistry<dyn MediaObserver> {
    /// Deliver `event` to every registered observer
    pub fn notify(&self, event: &MediaEvent) {
        trace!(?event, "Notifying observers");
        self.notify_with(|observer| event.dispatch(observer));
    }
}

impl<O: ?Sized> Default for ObserverRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_observer<O: ?Sized>(a: &Arc<O>, b: &Arc<O>) -> bool {
    // Compare data pointers only; vtable pointers of the same type may differ
    // between codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
