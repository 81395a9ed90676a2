//! Stream backend driving an external `mpv` process over JSON IPC
//!
//! mpv decodes and plays the stream; we talk to it through its
//! `--input-ipc-server` socket. Commands are written fire-and-forget and the
//! player state is mirrored from observed property changes, so every
//! [`StreamBackend`] call is non-blocking and safe from the heartbeat path.
//!
//! Each `time-pos` update is a heartbeat.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::domain::source::{self, BackendError, HeartbeatHandler, StreamBackend};
use switchyard_core::domain::volume::Volume;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Errors on the IPC wire
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Malformed IPC message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected IPC message: {0}")]
    Protocol(String),
}

/// Observed properties; `observe_property` ids are their index + 1
const OBSERVED: [&str; 5] = ["time-pos", "pause", "idle-active", "mute", "volume"];

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_RETRY: Duration = Duration::from_millis(100);

/// How to launch mpv
#[derive(Debug, Clone)]
pub struct MpvConfig {
    pub binary: PathBuf,
    /// Preset arguments placed before the built-in ones
    pub extra_args: Vec<String>,
    pub socket_path: PathBuf,
}

impl MpvConfig {
    pub fn new(binary: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args,
            socket_path: std::env::temp_dir()
                .join(format!("switchyard-mpv-{}.sock", std::process::id())),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.extend([
            "--idle=yes".to_string(),
            "--no-video".to_string(),
            "--no-terminal".to_string(),
            format!("--input-ipc-server={}", self.socket_path.display()),
        ]);
        args
    }
}

/// One decoded line from the IPC socket
#[derive(Debug, Clone, PartialEq)]
pub enum IpcMessage {
    PropertyChange { name: String, data: Value },
    Event(String),
    Reply { request_id: u64, error: String },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    event: Option<String>,
    name: Option<String>,
    #[serde(default)]
    data: Value,
    error: Option<String>,
    request_id: Option<u64>,
}

/// Decode one line received from mpv
pub fn parse_message(line: &str) -> Result<IpcMessage, IpcError> {
    let raw: RawMessage = serde_json::from_str(line)?;
    match (raw.event, raw.error) {
        (Some(event), _) if event == "property-change" => {
            let name = raw
                .name
                .ok_or_else(|| IpcError::Protocol("property-change without name".to_string()))?;
            Ok(IpcMessage::PropertyChange {
                name,
                data: raw.data,
            })
        }
        (Some(event), _) => Ok(IpcMessage::Event(event)),
        (None, Some(error)) => Ok(IpcMessage::Reply {
            request_id: raw.request_id.unwrap_or_default(),
            error,
        }),
        (None, None) => Err(IpcError::Protocol(line.to_string())),
    }
}

/// Encode a command line for mpv
pub fn encode_command(command: &[Value], request_id: u64) -> String {
    let mut line = json!({ "command": command, "request_id": request_id }).to_string();
    line.push('\n');
    line
}

/// Player state mirrored from mpv property changes
#[derive(Debug)]
pub struct MirroredState {
    paused: AtomicBool,
    idle: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU8,
}

impl Default for MirroredState {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            idle: AtomicBool::new(true),
            muted: AtomicBool::new(false),
            volume: AtomicU8::new(Volume::MAX),
        }
    }
}

impl MirroredState {
    /// Fold one message into the state.
    ///
    /// Returns `true` when the message is a heartbeat.
    pub fn apply(&self, message: &IpcMessage) -> bool {
        match message {
            IpcMessage::PropertyChange { name, data } => match (name.as_str(), data) {
                ("time-pos", Value::Number(_)) => return true,
                ("pause", Value::Bool(paused)) => self.paused.store(*paused, Ordering::Release),
                ("idle-active", Value::Bool(idle)) => self.idle.store(*idle, Ordering::Release),
                ("mute", Value::Bool(muted)) => self.muted.store(*muted, Ordering::Release),
                ("volume", Value::Number(n)) => {
                    let percent = n.as_f64().unwrap_or_default().round() as i32;
                    self.volume
                        .store(Volume::new(percent).percent(), Ordering::Release);
                }
                _ => trace!(property = %name, "Ignoring property change"),
            },
            IpcMessage::Event(event) if event == "end-file" => {
                self.idle.store(true, Ordering::Release);
            }
            IpcMessage::Event(event) if event == "start-file" => {
                self.idle.store(false, Ordering::Release);
            }
            IpcMessage::Event(event) => trace!(event = %event, "mpv event"),
            IpcMessage::Reply { error, .. } if error == "success" => {}
            IpcMessage::Reply { request_id, error } => {
                warn!(request_id, error = %error, "mpv rejected a command");
            }
        }
        false
    }

    pub fn is_playing(&self) -> bool {
        !self.idle.load(Ordering::Acquire) && !self.paused.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> Volume {
        Volume::from(self.volume.load(Ordering::Acquire) as i32)
    }
}

/// [`StreamBackend`] backed by an mpv child process
pub struct MpvBackend {
    commands: mpsc::UnboundedSender<String>,
    next_request: AtomicU64,
    state: Arc<MirroredState>,
    heartbeat: Arc<Mutex<Option<HeartbeatHandler>>>,
    child: Mutex<Option<Child>>,
    socket_path: PathBuf,
}

impl MpvBackend {
    /// Start mpv and attach to its IPC socket
    pub async fn launch(config: MpvConfig) -> source::Result<Self> {
        let _ = tokio::fs::remove_file(&config.socket_path).await;

        let args = config.args();
        info!(binary = %config.binary.display(), ?args, "Starting mpv");
        let child = Command::new(&config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BackendError::Unavailable(format!("failed to start {}: {}", config.binary.display(), e))
            })?;

        let stream = connect(&config.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let (commands, mut queue) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = queue.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(error = %e, "Failed to write to mpv");
                    break;
                }
            }
            debug!("mpv command writer stopped");
        });

        let state = Arc::new(MirroredState::default());
        let heartbeat: Arc<Mutex<Option<HeartbeatHandler>>> = Arc::new(Mutex::new(None));
        {
            let state = state.clone();
            let heartbeat = heartbeat.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => match parse_message(&line) {
                            Ok(message) => {
                                if state.apply(&message) {
                                    let handler = heartbeat.lock().ok().and_then(|h| h.clone());
                                    if let Some(handler) = handler {
                                        handler();
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "Skipping mpv message"),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            error!(error = %e, "Failed to read from mpv");
                            break;
                        }
                    }
                }
                info!("mpv IPC connection closed");
            });
        }

        let backend = Self {
            commands,
            next_request: AtomicU64::new(1),
            state,
            heartbeat,
            child: Mutex::new(Some(child)),
            socket_path: config.socket_path,
        };
        for (id, property) in OBSERVED.iter().enumerate() {
            backend.send(vec![
                json!("observe_property"),
                json!(id as u64 + 1),
                json!(property),
            ])?;
        }
        Ok(backend)
    }

    fn send(&self, command: Vec<Value>) -> source::Result<()> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        trace!(request_id, ?command, "mpv command");
        self.commands
            .send(encode_command(&command, request_id))
            .map_err(|_| BackendError::Released)
    }

    fn set_property(&self, name: &str, value: Value) -> source::Result<()> {
        self.send(vec![json!("set_property"), json!(name), value])
    }
}

async fn connect(socket_path: &Path) -> source::Result<UnixStream> {
    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                debug!(socket = %socket_path.display(), "Connected to mpv");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
        tokio::time::sleep(CONNECT_RETRY).await;
    }
    Err(BackendError::Unavailable(format!(
        "mpv IPC socket {} not reachable: {}",
        socket_path.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

impl StreamBackend for MpvBackend {
    fn subscribe_heartbeat(&self, handler: HeartbeatHandler) -> source::Result<()> {
        let mut slot = self
            .heartbeat
            .lock()
            .map_err(|_| BackendError::Unavailable("heartbeat slot poisoned".to_string()))?;
        *slot = Some(handler);
        Ok(())
    }

    fn play(&self, uri: &str) -> source::Result<()> {
        self.send(vec![json!("loadfile"), json!(uri), json!("replace")])?;
        self.set_property("pause", json!(false))
    }

    fn pause(&self) -> source::Result<()> {
        self.set_property("pause", json!(true))
    }

    fn stop(&self) -> source::Result<()> {
        self.send(vec![json!("stop")])
    }

    fn is_playing(&self) -> source::Result<bool> {
        Ok(self.state.is_playing())
    }

    fn set_mute(&self, muted: bool) -> source::Result<()> {
        self.set_property("mute", json!(muted))
    }

    fn is_muted(&self) -> source::Result<bool> {
        Ok(self.state.is_muted())
    }

    fn set_volume(&self, volume: Volume) -> source::Result<()> {
        self.set_property("volume", json!(volume.percent()))
    }

    fn volume(&self) -> source::Result<Volume> {
        Ok(self.state.volume())
    }

    fn release(&self) {
        let child = self.child.lock().ok().and_then(|mut child| child.take());
        let Some(mut child) = child else {
            return;
        };
        let _ = self.send(vec![json!("quit")]);
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "mpv already exited");
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("mpv released");
    }
}
