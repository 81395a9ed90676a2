//! Heartbeat-driven liveness detection
//!
//! Push-style stream backends never say "stopped"; they only report playback
//! progress. [`ActivityMonitor`] treats each progress report as a heartbeat and
//! declares the source inactive once heartbeats stop for longer than the
//! inactivity threshold.
//!
//! Internally the state is a three-valued atomic: `ACTIVE`, `INACTIVE` and a
//! transient `DRAINING` held while the inactivation edge is being delivered.
//! A heartbeat only activates from `INACTIVE`, which guarantees a single
//! watchdog per source and strictly alternating edge notifications.
//! `CLOSED` is terminal: once the owning source is disposed no heartbeat can
//! reopen an activity window.

use crate::domain::observer::{MediaEvent, MediaObserver, ObserverRegistry};
use crate::domain::source::SourceKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Observable liveness of a monitored source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Active,
    Inactive,
}

/// Timing parameters of the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySettings {
    /// Silence longer than this marks the source inactive
    pub inactivity_threshold: Duration,
    /// How often the watchdog checks the last heartbeat
    pub poll_interval: Duration,
}

impl ActivitySettings {
    pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_millis(2000);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            inactivity_threshold: Self::DEFAULT_INACTIVITY_THRESHOLD,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

const INACTIVE: u8 = 0;
const ACTIVE: u8 = 1;
const DRAINING: u8 = 2;
const CLOSED: u8 = 3;

struct MonitorShared {
    kind: SourceKind,
    state: AtomicU8,
    /// Bumped on every activation, reset and close; a watchdog exits once its epoch
    /// is stale.
    epoch: AtomicU64,
    last_heartbeat_ms: AtomicU64,
    threshold_ms: AtomicU64,
    poll_interval: Duration,
    origin: Instant,
    observers: Arc<ObserverRegistry<dyn MediaObserver>>,
}

impl MonitorShared {
    fn now_ms(&self) -> u64 {
        // Offset by one so a heartbeat at the origin is distinguishable from
        // "never".
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// Watches heartbeats and publishes activation edges
pub struct ActivityMonitor {
    shared: Arc<MonitorShared>,
    runtime: Handle,
}

impl ActivityMonitor {
    /// Create a monitor publishing to `observers`. Watchdogs are spawned on
    /// `runtime`.
    pub fn new(
        kind: SourceKind,
        settings: ActivitySettings,
        observers: Arc<ObserverRegistry<dyn MediaObserver>>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                kind,
                state: AtomicU8::new(INACTIVE),
                epoch: AtomicU64::new(0),
                last_heartbeat_ms: AtomicU64::new(0),
                threshold_ms: AtomicU64::new(settings.inactivity_threshold.as_millis() as u64),
                poll_interval: settings.poll_interval,
                origin: Instant::now(),
                observers,
            }),
            runtime,
        }
    }

    /// Record a heartbeat.
    ///
    /// Returns `true` when this heartbeat opened a new activity window, in
    /// which case a watchdog has been started.
    pub fn heartbeat(&self) -> bool {
        let shared = &self.shared;
        if shared.state.load(Ordering::Acquire) == CLOSED {
            return false;
        }
        shared
            .last_heartbeat_ms
            .fetch_max(shared.now_ms(), Ordering::AcqRel);

        if shared
            .state
            .compare_exchange(INACTIVE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(source = %shared.kind, epoch, "Activity detected");
        self.runtime.spawn(watchdog(shared.clone(), epoch));
        true
    }

    /// Force the inactivation edge; the watchdog delivers it on its next poll
    pub fn deactivate(&self) -> bool {
        let forced = self
            .shared
            .state
            .compare_exchange(ACTIVE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if forced {
            debug!(source = %self.shared.kind, "Activity forced inactive");
        }
        forced
    }

    /// Return to the initial state without notifying anyone.
    ///
    /// A closed monitor stays closed.
    pub fn reset(&self) {
        let shared = &self.shared;
        shared.epoch.fetch_add(1, Ordering::AcqRel);
        let _ = shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != CLOSED).then_some(INACTIVE)
            });
        shared.last_heartbeat_ms.store(0, Ordering::Release);
        debug!(source = %shared.kind, "Activity monitor reset");
    }

    /// Stop monitoring for good without notifying anyone.
    ///
    /// Later heartbeats are refused and a watchdog that has not delivered its
    /// activation yet exits silently.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        shared.epoch.fetch_add(1, Ordering::AcqRel);
        shared.last_heartbeat_ms.store(0, Ordering::Release);
        debug!(source = %shared.kind, "Activity monitor closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == CLOSED
    }

    pub fn state(&self) -> ActivityState {
        if self.is_active() {
            ActivityState::Active
        } else {
            ActivityState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Time of the last heartbeat since the monitor was created, `None` if
    /// no heartbeat arrived since creation or the last reset
    pub fn last_heartbeat(&self) -> Option<Duration> {
        match self.shared.last_heartbeat_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms - 1)),
        }
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.shared.threshold_ms.load(Ordering::Acquire))
    }

    pub fn set_inactivity_threshold(&self, threshold: Duration) {
        self.shared
            .threshold_ms
            .store(threshold.as_millis() as u64, Ordering::Release);
        debug!(source = %self.shared.kind, threshold_ms = threshold.as_millis() as u64, "Inactivity threshold updated");
    }
}

async fn watchdog(shared: Arc<MonitorShared>, epoch: u64) {
    // Closed between the heartbeat and the first run of this task
    if shared.state.load(Ordering::Acquire) != ACTIVE
        || shared.epoch.load(Ordering::Acquire) != epoch
    {
        trace!(source = %shared.kind, epoch, "Watchdog cancelled before activation");
        return;
    }
    shared.observers.notify(&MediaEvent::Activated(shared.kind));

    loop {
        tokio::time::sleep(shared.poll_interval).await;

        if shared.epoch.load(Ordering::Acquire) != epoch {
            trace!(source = %shared.kind, epoch, "Watchdog superseded");
            return;
        }

        match shared.state.load(Ordering::Acquire) {
            ACTIVE => {
                let last = shared.last_heartbeat_ms.load(Ordering::Acquire);
                let elapsed = shared.now_ms().saturating_sub(last);
                if elapsed <= shared.threshold_ms.load(Ordering::Acquire) {
                    continue;
                }
                if shared
                    .state
                    .compare_exchange(ACTIVE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                debug!(source = %shared.kind, elapsed_ms = elapsed, "Heartbeat timed out");
            }
            DRAINING => {}
            _ => return,
        }

        shared.observers.notify(&MediaEvent::Inactivated(shared.kind));
        let _ = shared.state.compare_exchange(
            DRAINING,
            INACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(source = %shared.kind, epoch, "Activity ended");
        return;
    }
}
