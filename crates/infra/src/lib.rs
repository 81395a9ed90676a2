//! Platform backends for Switchyard
//!
//! Implementations of the collaborator traits defined in `switchyard-core`.

pub mod audio;
pub mod bluetooth;
