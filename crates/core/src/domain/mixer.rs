//! Physical mixer abstractions
//!
//! This module defines the platform-agnostic view of the hardware master
//! output. Implementations for specific mixers (ALSA via `amixer`, test
//! doubles) live in the `infra` crate or in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while touching the physical mixer
#[derive(Debug, Error)]
pub enum MixerError {
    /// Requested mixer control was not found
    #[error("Control not found: {0}")]
    ControlNotFound(String),

    /// The control exists but could not be opened
    #[error("Failed to open control: {0}")]
    OpenFailed(String),

    /// The control rejected a value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),
}

pub type Result<T> = std::result::Result<T, MixerError>;

/// Native numeric range of a mixer control
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlRange {
    pub min: f32,
    pub max: f32,
}

impl ControlRange {
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// An opened mixer control.
///
/// Dropping the control releases it; implementations close their handle in
/// `Drop` so release happens on every exit path.
pub trait MixerControl {
    /// Native range of the control
    fn range(&self) -> ControlRange;

    /// Current native value
    fn value(&self) -> Result<f32>;

    /// Write a native value
    fn set_value(&mut self, value: f32) -> Result<()>;
}

/// The hardware master output.
///
/// Not required to be thread-safe: the coalescer's worker is the only caller
/// and owns the output on its own thread.
pub trait MasterOutput: Send {
    /// Human readable control name for logs
    fn name(&self) -> &str;

    /// Acquire the master control for the duration of one write
    fn open(&mut self) -> Result<Box<dyn MixerControl + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_span_and_clamp() {
        let range = ControlRange::new(0.0, 87.0);
        assert_eq!(range.span(), 87.0);
        assert_eq!(range.clamp(100.0), 87.0);
        assert_eq!(range.clamp(-3.0), 0.0);
        assert_eq!(range.clamp(40.0), 40.0);
    }

    #[test]
    fn test_range_orders_bounds() {
        let range = ControlRange::new(1.0, -1.0);
        assert_eq!(range.min, -1.0);
        assert_eq!(range.max, 1.0);
    }

    #[test]
    fn test_error_display() {
        let err = MixerError::ControlNotFound("Master".to_string());
        assert_eq!(err.to_string(), "Control not found: Master");
    }
}
