//! Media source abstractions
//!
//! A [`MediaSource`] is what the switcher and the outer shells (CLI, GUI)
//! drive. Each source wraps a backend trait object that talks to the real
//! decoder or device; those backends live in the `infra` crate.

use crate::domain::track::PropertyValue;
use crate::domain::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by source backends
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend or the remote player is not reachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed a command
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The backend cannot run on this platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The backend has been released
    #[error("Backend released")]
    Released,

    /// Input/Output error at the OS level
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Which of the two sources an event comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Stream,
    Wireless,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Stream => f.write_str("stream"),
            SourceKind::Wireless => f.write_str("wireless"),
        }
    }
}

/// Transport controls shared by every media source.
///
/// Backend failures are logged by the source and reported as `false`; they
/// never propagate past this boundary.
pub trait MediaSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn play(&self) -> bool;

    fn pause(&self) -> bool;

    fn stop(&self) -> bool;

    fn next(&self) -> bool;

    fn previous(&self) -> bool;

    fn is_playing(&self) -> bool;

    fn set_volume(&self, volume: Volume) -> bool;

    /// Release the backend. Calling this more than once is a no-op.
    fn dispose(&self);
}

/// Invoked by a stream backend on every playback position update
pub type HeartbeatHandler = Arc<dyn Fn() + Send + Sync>;

/// Stream decoder collaborator.
///
/// All methods must be callable from the heartbeat thread.
pub trait StreamBackend: Send + Sync {
    /// Register the heartbeat callback. Called once by the owning player.
    fn subscribe_heartbeat(&self, handler: HeartbeatHandler) -> Result<()>;

    fn play(&self, uri: &str) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_playing(&self) -> Result<bool>;

    fn set_mute(&self, muted: bool) -> Result<()>;

    fn is_muted(&self) -> Result<bool>;

    fn set_volume(&self, volume: Volume) -> Result<()>;

    fn volume(&self) -> Result<Volume>;

    /// Free decoder resources. Must tolerate repeated calls.
    fn release(&self);
}

/// One property-change signal from a wireless backend
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesChanged {
    /// Object path the signal was emitted for
    pub path: String,
    /// Interface whose properties changed
    pub interface: String,
    pub changed: Vec<(String, PropertyValue)>,
}

/// Invoked by a wireless backend for every property-change signal
pub type PropertiesHandler = Arc<dyn Fn(PropertiesChanged) + Send + Sync>;

/// Wireless player collaborator.
///
/// Methods are called from observer callbacks on the async runtime and
/// must not block: transport commands are queued, not awaited.
pub trait WirelessBackend: Send + Sync {
    /// Register the property-change callback. Called once by the owning player.
    fn subscribe_properties(&self, handler: PropertiesHandler) -> Result<()>;

    /// Whether a connected device currently exposes a media player
    fn has_player(&self) -> bool;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn next(&self) -> Result<()>;

    fn previous(&self) -> Result<()>;

    /// Close the underlying connection. Must tolerate repeated calls.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::Stream.to_string(), "stream");
        assert_eq!(SourceKind::Wireless.to_string(), "wireless");
    }

    #[test]
    fn test_backend_error_from_io() {
        let err: BackendError = std::io::Error::new(std::io::ErrorKind::NotFound, "mpv").into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
