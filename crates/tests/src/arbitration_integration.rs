//! Integration tests for stream/wireless arbitration
//!
//! Real players, hub and switcher run against recording backends. Time is
//! paused so the inactivity watchdog advances deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::domain::mixer;
use switchyard_core::domain::source;
use switchyard_core::domain::{
    ActivitySettings, ActivityState, ControlRange, HeartbeatHandler, HubSettings, LinearCurve,
    MasterOutput, MediaController, MediaHub, MediaSource, MixerControl, MixerWorker,
    PropertiesHandler, Status, StreamBackend, StreamPlayer, SwitchyardConfig, Volume,
    VolumeCoalescer, WirelessBackend, WirelessPlayer,
};
use switchyard_infra::bluetooth::parse_signal;
use tokio::runtime::Handle;
use tracing_subscriber::filter::LevelFilter;

const PLAYER_PATH: &str = "/org/bluez/hci0/dev_00_11_22_33_44_55/player0";

// ============================================================================
// RECORDING BACKENDS
// ============================================================================

#[derive(Default)]
struct StreamLog {
    heartbeat: Mutex<Option<HeartbeatHandler>>,
    plays: AtomicUsize,
    releases: AtomicUsize,
    playing: AtomicBool,
}

impl StreamLog {
    fn beat(&self) {
        let handler = self.heartbeat.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

struct RecordingStream(Arc<StreamLog>);

impl StreamBackend for RecordingStream {
    fn subscribe_heartbeat(&self, handler: HeartbeatHandler) -> source::Result<()> {
        *self.0.heartbeat.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn play(&self, _uri: &str) -> source::Result<()> {
        self.0.plays.fetch_add(1, Ordering::SeqCst);
        self.0.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> source::Result<()> {
        self.0.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> source::Result<()> {
        self.0.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> source::Result<bool> {
        Ok(self.0.playing.load(Ordering::SeqCst))
    }

    fn set_mute(&self, _muted: bool) -> source::Result<()> {
        Ok(())
    }

    fn is_muted(&self) -> source::Result<bool> {
        Ok(false)
    }

    fn set_volume(&self, _volume: Volume) -> source::Result<()> {
        Ok(())
    }

    fn volume(&self) -> source::Result<Volume> {
        Ok(Volume::new(50))
    }

    fn release(&self) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WirelessLog {
    properties: Mutex<Option<PropertiesHandler>>,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    closes: AtomicUsize,
}

impl WirelessLog {
    /// Feed one `busctl monitor` line through the BlueZ signal parser
    fn emit(&self, line: &str) {
        let signal = parse_signal(line).expect("valid PropertiesChanged line");
        let handler = self.properties.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(signal);
        }
    }

    fn emit_status(&self, status: &str) {
        self.emit(&format!(
            r#"{{"type":"signal","path":"{PLAYER_PATH}","member":"PropertiesChanged","payload":{{"type":"sa{{sv}}as","data":["org.bluez.MediaPlayer1",{{"Status":{{"type":"s","data":"{status}"}}}},[]]}}}}"#
        ));
    }

    fn emit_volume(&self, raw: u16) {
        self.emit(&format!(
            r#"{{"type":"signal","path":"{PLAYER_PATH}","member":"PropertiesChanged","payload":{{"type":"sa{{sv}}as","data":["org.bluez.MediaTransport1",{{"Volume":{{"type":"q","data":{raw}}}}},[]]}}}}"#
        ));
    }
}

struct RecordingWireless(Arc<WirelessLog>);

impl WirelessBackend for RecordingWireless {
    fn subscribe_properties(&self, handler: PropertiesHandler) -> source::Result<()> {
        *self.0.properties.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn has_player(&self) -> bool {
        true
    }

    fn play(&self) -> source::Result<()> {
        self.0.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> source::Result<()> {
        self.0.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> source::Result<()> {
        Ok(())
    }

    fn next(&self) -> source::Result<()> {
        Ok(())
    }

    fn previous(&self) -> source::Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct RecordingControl(Arc<Mutex<Vec<f32>>>);

impl MixerControl for RecordingControl {
    fn range(&self) -> ControlRange {
        ControlRange::new(0.0, 100.0)
    }

    fn value(&self) -> mixer::Result<f32> {
        Ok(self.0.lock().unwrap().last().copied().unwrap_or_default())
    }

    fn set_value(&mut self, value: f32) -> mixer::Result<()> {
        self.0.lock().unwrap().push(value);
        Ok(())
    }
}

struct RecordingMaster(Arc<Mutex<Vec<f32>>>);

impl MasterOutput for RecordingMaster {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&mut self) -> mixer::Result<Box<dyn MixerControl + '_>> {
        Ok(Box::new(RecordingControl(self.0.clone())))
    }
}

/// Shared sink for formatted log output
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Rig {
    hub: Arc<MediaHub>,
    stream: Arc<StreamPlayer>,
    stream_log: Arc<StreamLog>,
    wireless_log: Arc<WirelessLog>,
    worker: MixerWorker,
    writes: Arc<Mutex<Vec<f32>>>,
}

impl Rig {
    fn new(with_wireless: bool, settings: HubSettings) -> Self {
        let stream_log = Arc::new(StreamLog::default());
        let wireless_log = Arc::new(WirelessLog::default());

        let stream = StreamPlayer::new(
            "udp://0.0.0.0:23456",
            Box::new(RecordingStream(stream_log.clone())),
            ActivitySettings::default(),
            Handle::current(),
        )
        .unwrap();
        let wireless = with_wireless.then(|| {
            WirelessPlayer::new(Box::new(RecordingWireless(wireless_log.clone()))).unwrap()
        });

        let writes = Arc::new(Mutex::new(Vec::new()));
        let (coalescer, worker) = VolumeCoalescer::new(
            Box::new(RecordingMaster(writes.clone())),
            Box::new(LinearCurve),
        );
        let hub = MediaHub::new(stream.clone(), wireless, coalescer, settings);

        Self {
            hub,
            stream,
            stream_log,
            wireless_log,
            worker,
            writes,
        }
    }

    fn flush(&mut self) -> Vec<f32> {
        self.worker.commit_pending();
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    fn wireless_pauses(&self) -> usize {
        self.wireless_log.pauses.load(Ordering::SeqCst)
    }

    fn wireless_plays(&self) -> usize {
        self.wireless_log.plays.load(Ordering::SeqCst)
    }
}

fn yielding(amplify_volume: u8) -> HubSettings {
    HubSettings {
        should_yield: true,
        amplify_volume,
    }
}

/// Let spawned watchdogs run, auto-advancing paused time
async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ============================================================================
// ARBITRATION TESTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stream_preempts_and_returns_speakers() {
    let mut rig = Rig::new(true, yielding(30));
    rig.wireless_log.emit_status("playing");
    rig.wireless_log.emit_volume(89);
    assert_eq!(rig.hub.switcher().unwrap().last_volume(), Some(Volume::new(70)));

    rig.stream_log.beat();
    settle(10).await;

    assert_eq!(rig.stream.activity(), ActivityState::Active);
    assert_eq!(rig.wireless_pauses(), 1);
    assert_eq!(rig.flush(), vec![30.0]);

    settle(2500).await;

    assert_eq!(rig.stream.activity(), ActivityState::Inactive);
    assert_eq!(rig.wireless_plays(), 1);
    assert_eq!(rig.flush(), vec![70.0]);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_stream_yields_once() {
    let mut rig = Rig::new(true, yielding(30));
    rig.wireless_log.emit_volume(89);

    for _ in 0..6 {
        rig.stream_log.beat();
        settle(500).await;
    }

    assert_eq!(rig.stream.activity(), ActivityState::Active);
    assert_eq!(rig.wireless_pauses(), 1);
    assert_eq!(rig.wireless_plays(), 0);
    assert_eq!(rig.flush(), vec![30.0]);
}

#[tokio::test(start_paused = true)]
async fn test_no_yield_leaves_wireless_alone() {
    let mut rig = Rig::new(
        true,
        HubSettings {
            should_yield: false,
            amplify_volume: 30,
        },
    );
    rig.wireless_log.emit_volume(89);

    rig.stream_log.beat();
    settle(10).await;
    settle(2500).await;

    assert_eq!(rig.wireless_pauses(), 0);
    assert_eq!(rig.wireless_plays(), 0);
    assert!(rig.flush().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_zero_amplify_only_pauses() {
    let mut rig = Rig::new(true, yielding(0));
    rig.wireless_log.emit_volume(89);

    rig.stream_log.beat();
    settle(10).await;
    assert_eq!(rig.wireless_pauses(), 1);
    assert!(rig.flush().is_empty());

    settle(2500).await;
    assert_eq!(rig.wireless_plays(), 1);
    assert!(rig.flush().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wireless_status_edges_do_not_trigger_yield() {
    let mut rig = Rig::new(true, yielding(30));

    rig.wireless_log.emit_status("playing");
    rig.wireless_log.emit_status("paused");
    settle(10).await;

    assert_eq!(rig.wireless_pauses(), 0);
    assert_eq!(rig.wireless_plays(), 0);
    assert!(rig.flush().is_empty());
    assert_eq!(rig.hub.wireless_player().unwrap().status(), Some(Status::Paused));
}

#[tokio::test(start_paused = true)]
async fn test_stream_only_mode() {
    let mut rig = Rig::new(false, yielding(30));

    assert!(rig.stream.play());
    rig.stream_log.beat();
    settle(10).await;
    assert_eq!(rig.stream.activity(), ActivityState::Active);

    settle(2500).await;
    assert_eq!(rig.stream.activity(), ActivityState::Inactive);
    assert!(rig.flush().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stream_only_mode_warns_once() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(LevelFilter::WARN)
        .with_ansi(false)
        .finish();

    let rig = tracing::subscriber::with_default(subscriber, || Rig::new(false, yielding(30)));

    assert!(rig.hub.wireless_source().is_none());
    assert_eq!(logs.contents().matches("WARN").count(), 1);
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_twice_releases_once() {
    let mut rig = Rig::new(true, yielding(30));

    rig.hub.dispose_media_players();
    rig.hub.dispose_media_players();

    assert_eq!(rig.stream_log.releases.load(Ordering::SeqCst), 1);
    assert_eq!(rig.wireless_log.closes.load(Ordering::SeqCst), 1);
    assert!(rig.hub.stream_source().is_none());
    assert!(rig.hub.wireless_source().is_none());

    // Late heartbeats after disposal are ignored
    rig.stream_log.beat();
    settle(10).await;
    assert_eq!(rig.stream.activity(), ActivityState::Inactive);
    assert!(!rig.stream.play());
    assert_eq!(rig.wireless_pauses(), 0);
    assert!(rig.flush().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_runtime_settings_from_config() {
    let rig = Rig::new(true, yielding(30));

    let mut config = SwitchyardConfig::factory_default();
    config.switcher.should_yield = false;
    config.switcher.amplify_volume = 55;
    config.stream.inactivity_threshold_ms = 500;
    config.apply_runtime_settings(&rig.hub);

    assert!(!rig.hub.switcher().unwrap().should_yield());
    assert_eq!(rig.hub.amplify_volume(), 55);
    assert_eq!(rig.stream.inactivity_threshold(), Duration::from_millis(500));

    rig.stream_log.beat();
    settle(10).await;
    settle(600).await;
    assert_eq!(rig.stream.activity(), ActivityState::Inactive);
    assert_eq!(rig.wireless_pauses(), 0);
}
