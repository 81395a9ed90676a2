//! ALSA master output through the `amixer` tool
//!
//! Each commit opens the simple control (`amixer sget`), reads its native
//! range and writes the raw value (`amixer sset`). The control handle is
//! released when dropped.

use std::process::Command;
use switchyard_core::domain::mixer::{
    ControlRange, MasterOutput, MixerControl, MixerError, Result,
};
use tracing::{debug, trace};

/// Simple mixer control driven through `amixer`
#[derive(Debug, Clone)]
pub struct AmixerOutput {
    control: String,
    card: Option<String>,
}

impl AmixerOutput {
    pub fn new(control: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            card: None,
        }
    }

    /// Target a specific sound card instead of the default one
    pub fn with_card(mut self, card: impl Into<String>) -> Self {
        self.card = Some(card.into());
        self
    }

    fn amixer(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new("amixer");
        if let Some(card) = &self.card {
            command.args(["-c", card.as_str()]);
        }
        let output = command
            .args(args)
            .output()
            .map_err(|e| MixerError::OsError(format!("amixer failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Unable to find simple control") {
                return Err(MixerError::ControlNotFound(self.control.clone()));
            }
            return Err(MixerError::OsError(format!(
                "amixer {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MasterOutput for AmixerOutput {
    fn name(&self) -> &str {
        &self.control
    }

    fn open(&mut self) -> Result<Box<dyn MixerControl + '_>> {
        let report = self.amixer(&["sget", &self.control])?;
        let range = parse_limits(&report).ok_or_else(|| {
            MixerError::OpenFailed(format!("{} has no playback volume", self.control))
        })?;
        trace!(control = %self.control, min = range.min, max = range.max, "Mixer control opened");
        Ok(Box::new(AmixerControl {
            output: self,
            range,
            last_report: report,
        }))
    }
}

/// An opened `amixer` control
pub struct AmixerControl<'a> {
    output: &'a AmixerOutput,
    range: ControlRange,
    last_report: String,
}

impl MixerControl for AmixerControl<'_> {
    fn range(&self) -> ControlRange {
        self.range
    }

    fn value(&self) -> Result<f32> {
        parse_playback_value(&self.last_report)
            .ok_or_else(|| MixerError::InvalidValue("no playback value reported".to_string()))
    }

    fn set_value(&mut self, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(MixerError::InvalidValue(value.to_string()));
        }
        let raw = self.range.clamp(value).round() as i64;
        self.last_report = self
            .output
            .amixer(&["sset", &self.output.control, &raw.to_string()])?;
        debug!(control = %self.output.control, raw, "Mixer value written");
        Ok(())
    }
}

impl Drop for AmixerControl<'_> {
    fn drop(&mut self) {
        trace!(control = %self.output.control, "Mixer control released");
    }
}

/// Parse `Limits: Playback 0 - 87` from an `amixer sget` report
pub fn parse_limits(report: &str) -> Option<ControlRange> {
    report.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Limits:")?;
        let rest = rest.trim().strip_prefix("Playback").unwrap_or(rest).trim();
        let (min, max) = rest.split_once(" - ")?;
        let min = min.trim().parse::<f32>().ok()?;
        let max = max.trim().parse::<f32>().ok()?;
        Some(ControlRange::new(min, max))
    })
}

/// Parse the first channel's raw playback value
pub fn parse_playback_value(report: &str) -> Option<f32> {
    report
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("Limits:"))
        .find_map(|line| {
            let (_, rest) = line.split_once(": Playback ")?;
            rest.split_whitespace().next()?.parse::<f32>().ok()
        })
}
