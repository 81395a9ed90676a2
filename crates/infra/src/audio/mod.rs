//! Process-backed audio implementations
//!
//! - `alsa_mixer`: hardware master volume through `amixer`
//! - `mpv`: stream decoding and playback through an `mpv` child process

pub mod alsa_mixer;
#[cfg(unix)]
pub mod mpv;

pub use alsa_mixer::*;
#[cfg(unix)]
pub use mpv::*;
