//! Domain entities and business rules

pub mod activity;
pub mod config;
pub mod controller;
pub mod mixer;
pub mod observer;
pub mod source;
pub mod stream;
pub mod switcher;
pub mod track;
pub mod volume;
pub mod wireless;

// Re-export specific items to avoid ambiguous `Result` aliases
pub use activity::{ActivityMonitor, ActivitySettings, ActivityState};
pub use config::{
    ConfigError, ConfigManager, ConfigWatcher, CurveKind, MixerConfig, PresetConfig, StreamConfig,
    StreamPreset, SwitcherConfig, SwitchyardConfig, UiConfig,
};
pub use controller::{HubSettings, MediaController, MediaHub};
pub use mixer::{ControlRange, MasterOutput, MixerControl, MixerError};
pub use observer::{MediaEvent, MediaObserver, ObserverRegistry};
pub use source::{
    BackendError, HeartbeatHandler, MediaSource, PropertiesChanged, PropertiesHandler, SourceKind,
    StreamBackend, WirelessBackend,
};
pub use stream::StreamPlayer;
pub use switcher::MediaSwitcher;
pub use track::{DecodeError, PropertyValue, Status, Track, WirelessProperty};
pub use volume::{LinearCurve, LogCurve, MixerWorker, Volume, VolumeCoalescer, VolumeCurve};
pub use wireless::WirelessPlayer;
