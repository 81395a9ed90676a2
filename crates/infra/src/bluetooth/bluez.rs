//! BlueZ AVRCP backend through the `busctl` tool
//!
//! Property changes and player lifecycle signals are read from
//! `busctl monitor` in JSON mode on the `bluez-monitor` thread, which also
//! keeps the connected player's object path cached. Transport commands are
//! queued to the `bluez-commands` thread that runs the `busctl call`s, so no
//! [`WirelessBackend`] method waits on a child process. Becoming a bus
//! monitor needs the privileges of the system bus policy (root by default).
//!
//! Device discovery and pairing are left to the system.

use crossbeam::channel::{unbounded, Receiver, Sender};
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use switchyard_core::domain::source::{
    self, BackendError, PropertiesChanged, PropertiesHandler, WirelessBackend,
};
use switchyard_core::domain::track::PropertyValue;
use tracing::{debug, info, trace, warn};

pub const BLUEZ_SERVICE: &str = "org.bluez";
pub const MEDIA_PLAYER_INTERFACE: &str = "org.bluez.MediaPlayer1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
const PROPERTIES_CHANGED: &str = "PropertiesChanged";
const INTERFACES_ADDED: &str = "InterfacesAdded";
const INTERFACES_REMOVED: &str = "InterfacesRemoved";

/// Decode a `{"type": <signature>, "data": <value>}` variant
pub fn decode_variant(variant: &Value) -> Option<PropertyValue> {
    let signature = variant.get("type")?.as_str()?;
    decode_value(signature, variant.get("data")?)
}

/// Decode busctl JSON data of a given D-Bus signature
pub fn decode_value(signature: &str, data: &Value) -> Option<PropertyValue> {
    match signature {
        "v" => decode_variant(data),
        "s" | "o" | "g" => data.as_str().map(|s| PropertyValue::Str(s.to_string())),
        "b" => data.as_bool().map(PropertyValue::Bool),
        "y" => data.as_u64().and_then(|n| u8::try_from(n).ok()).map(PropertyValue::Byte),
        "q" => data.as_u64().and_then(|n| u16::try_from(n).ok()).map(PropertyValue::U16),
        "u" => data.as_u64().and_then(|n| u32::try_from(n).ok()).map(PropertyValue::U32),
        "t" => data.as_u64().map(PropertyValue::U64),
        "n" | "i" => data.as_i64().and_then(|n| i32::try_from(n).ok()).map(PropertyValue::I32),
        sig if sig.starts_with("a{") && sig.ends_with('}') => {
            // Only string-keyed dictionaries occur in BlueZ properties
            let value_sig = sig[2..sig.len() - 1].get(1..)?;
            let entries = data
                .as_object()?
                .iter()
                .filter_map(|(key, value)| match decode_value(value_sig, value) {
                    Some(decoded) => Some((key.clone(), decoded)),
                    None => {
                        warn!(entry = %key, signature = value_sig, "Undecodable dictionary entry");
                        None
                    }
                })
                .collect::<BTreeMap<_, _>>();
            Some(PropertyValue::Dict(entries))
        }
        sig if sig.starts_with('a') => {
            let items = data
                .as_array()?
                .iter()
                .map(|item| decode_value(&sig[1..], item))
                .collect::<Option<Vec<_>>>()?;
            Some(PropertyValue::Array(items))
        }
        other => {
            trace!(signature = other, "Unsupported D-Bus signature");
            None
        }
    }
}

/// Parse one `busctl monitor --json=short` line into a property-change
/// signal. Other messages yield `None`.
pub fn parse_signal(line: &str) -> Option<PropertiesChanged> {
    let message: Value = serde_json::from_str(line).ok()?;
    properties_changed(&message)
}

fn properties_changed(message: &Value) -> Option<PropertiesChanged> {
    if message.get("member")?.as_str()? != PROPERTIES_CHANGED {
        return None;
    }
    let path = message.get("path")?.as_str()?.to_string();
    let args = message.get("payload")?.get("data")?.as_array()?;
    let interface = args.first()?.as_str()?.to_string();

    let changed = args
        .get(1)?
        .as_object()?
        .iter()
        .filter_map(|(name, variant)| match decode_variant(variant) {
            Some(value) => Some((name.clone(), value)),
            None => {
                warn!(path = %path, property = %name, "Undecodable property payload");
                None
            }
        })
        .collect();

    Some(PropertiesChanged {
        path,
        interface,
        changed,
    })
}

/// Appearance or removal of a media player object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerLifecycle {
    Added(String),
    Removed(String),
}

/// Parse one `busctl monitor --json=short` line into a player lifecycle
/// change. Signals about other interfaces yield `None`.
pub fn parse_lifecycle(line: &str) -> Option<PlayerLifecycle> {
    let message: Value = serde_json::from_str(line).ok()?;
    player_lifecycle(&message)
}

fn player_lifecycle(message: &Value) -> Option<PlayerLifecycle> {
    let member = message.get("member")?.as_str()?;
    let args = message.get("payload")?.get("data")?.as_array()?;
    let path = args.first()?.as_str()?.to_string();
    match member {
        INTERFACES_ADDED => args
            .get(1)?
            .as_object()?
            .contains_key(MEDIA_PLAYER_INTERFACE)
            .then_some(PlayerLifecycle::Added(path)),
        INTERFACES_REMOVED => args
            .get(1)?
            .as_array()?
            .iter()
            .any(|iface| iface.as_str() == Some(MEDIA_PLAYER_INTERFACE))
            .then_some(PlayerLifecycle::Removed(path)),
        _ => None,
    }
}

/// First media player whose device is connected, from a
/// `GetManagedObjects` reply
pub fn find_player(reply: &Value) -> Option<String> {
    let objects = reply.get("data")?.get(0)?.as_object()?;
    let connected = |device: &str| {
        objects
            .get(device)
            .and_then(|ifaces| ifaces.get(DEVICE_INTERFACE))
            .and_then(|props| props.get("Connected"))
            .and_then(decode_variant)
            == Some(PropertyValue::Bool(true))
    };

    objects.iter().find_map(|(path, ifaces)| {
        let player = ifaces.get(MEDIA_PLAYER_INTERFACE)?;
        let device = player
            .get("Device")
            .and_then(decode_variant)
            .and_then(|device| device.as_str().map(str::to_string))
            .or_else(|| path.rsplit_once('/').map(|(parent, _)| parent.to_string()))?;
        connected(&device).then(|| path.clone())
    })
}

type PlayerSlot = Arc<Mutex<Option<String>>>;
type HandlerSlot = Arc<Mutex<Option<PropertiesHandler>>>;

/// Transport methods of `org.bluez.MediaPlayer1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

impl PlayerCommand {
    pub fn method(&self) -> &'static str {
        match self {
            PlayerCommand::Play => "Play",
            PlayerCommand::Pause => "Pause",
            PlayerCommand::Stop => "Stop",
            PlayerCommand::Next => "Next",
            PlayerCommand::Previous => "Previous",
        }
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn busctl(args: &[&str]) -> source::Result<String> {
    let output = Command::new("busctl")
        .arg("--system")
        .args(args)
        .output()?;
    if !output.status.success() {
        return Err(BackendError::CommandFailed(format!(
            "busctl {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn managed_objects() -> source::Result<Value> {
    let reply = busctl(&[
        "--json=short",
        "call",
        BLUEZ_SERVICE,
        "/",
        "org.freedesktop.DBus.ObjectManager",
        "GetManagedObjects",
    ])?;
    serde_json::from_str(&reply).map_err(|e| {
        BackendError::CommandFailed(format!("malformed GetManagedObjects reply: {}", e))
    })
}

/// Fold one monitor line into the player cache and forward property changes
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn handle_monitor_line(line: &str, player: &Mutex<Option<String>>, handler: &Mutex<Option<PropertiesHandler>>) {
    let Ok(message) = serde_json::from_str::<Value>(line) else {
        return;
    };

    if let Some(lifecycle) = player_lifecycle(&message) {
        if let Ok(mut cached) = player.lock() {
            match lifecycle {
                PlayerLifecycle::Added(path) => {
                    info!(player = %path, "Media player appeared");
                    *cached = Some(path);
                }
                PlayerLifecycle::Removed(path) => {
                    if cached.as_deref() == Some(path.as_str()) {
                        info!(player = %path, "Media player gone");
                        *cached = None;
                    }
                }
            }
        }
        return;
    }

    let Some(signal) = properties_changed(&message) else {
        return;
    };
    if signal.interface == MEDIA_PLAYER_INTERFACE {
        if let Ok(mut cached) = player.lock() {
            if cached.is_none() {
                debug!(player = %signal.path, "Media player found from its signals");
                *cached = Some(signal.path.clone());
            }
        }
    }
    let handler = handler.lock().ok().and_then(|h| h.clone());
    if let Some(handler) = handler {
        handler(signal);
    }
}

/// Run queued transport commands until every sender is dropped
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn run_commands(requests: Receiver<PlayerCommand>, player: PlayerSlot) {
    for command in requests.iter() {
        let Some(path) = player.lock().ok().and_then(|cached| cached.clone()) else {
            warn!(?command, "No connected media player, dropping command");
            continue;
        };
        match busctl(&["call", BLUEZ_SERVICE, &path, MEDIA_PLAYER_INTERFACE, command.method()]) {
            Ok(_) => debug!(player = %path, ?command, "Media player command sent"),
            Err(e) => warn!(player = %path, ?command, error = %e, "Media player command failed"),
        }
    }
    debug!("BlueZ command thread stopped");
}

/// [`WirelessBackend`] for BlueZ on the system bus
pub struct BluezBackend {
    handler: HandlerSlot,
    player: PlayerSlot,
    commands: Mutex<Option<Sender<PlayerCommand>>>,
    monitor: Mutex<Option<Child>>,
}

impl BluezBackend {
    /// Attach to BlueZ and start the monitor and command threads.
    ///
    /// Blocks while bluetoothd is queried for a connected player.
    #[cfg(target_os = "linux")]
    pub fn connect() -> source::Result<Self> {
        use std::io::{BufRead, BufReader};
        use std::process::Stdio;

        // Fails early when bluetoothd is not on the bus
        let objects = managed_objects().map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let player: PlayerSlot = Arc::new(Mutex::new(find_player(&objects)));

        let mut child = Command::new("busctl")
            .args(["--system", "--json=short", "monitor", BLUEZ_SERVICE])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Unavailable("busctl monitor has no stdout".to_string()))?;

        let handler: HandlerSlot = Arc::new(Mutex::new(None));
        {
            let handler = handler.clone();
            let player = player.clone();
            std::thread::Builder::new()
                .name("bluez-monitor".to_string())
                .spawn(move || {
                    for line in BufReader::new(stdout).lines() {
                        match line {
                            Ok(line) => handle_monitor_line(&line, &player, &handler),
                            Err(e) => {
                                warn!(error = %e, "Failed to read busctl monitor output");
                                break;
                            }
                        }
                    }
                    debug!("BlueZ monitor stopped");
                })?;
        }

        let (commands, requests) = unbounded();
        {
            let player = player.clone();
            std::thread::Builder::new()
                .name("bluez-commands".to_string())
                .spawn(move || run_commands(requests, player))?;
        }

        match player.lock().ok().and_then(|cached| cached.clone()) {
            Some(path) => info!(player = %path, "Connected to BlueZ"),
            None => info!("Connected to BlueZ, no media player yet"),
        }
        Ok(Self {
            handler,
            player,
            commands: Mutex::new(Some(commands)),
            monitor: Mutex::new(Some(child)),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn connect() -> source::Result<Self> {
        Err(BackendError::UnsupportedPlatform(format!(
            "BlueZ is only available on Linux, not {}",
            std::env::consts::OS
        )))
    }

    /// Object path of the cached media player
    pub fn player_path(&self) -> Option<String> {
        self.player.lock().ok().and_then(|cached| cached.clone())
    }

    fn queue(&self, command: PlayerCommand) -> source::Result<()> {
        if !self.has_player() {
            return Err(BackendError::Unavailable("no connected media player".to_string()));
        }
        let commands = self
            .commands
            .lock()
            .map_err(|_| BackendError::Unavailable("command queue poisoned".to_string()))?;
        commands
            .as_ref()
            .ok_or(BackendError::Released)?
            .send(command)
            .map_err(|_| BackendError::Released)?;
        trace!(?command, "Media player command queued");
        Ok(())
    }
}

impl WirelessBackend for BluezBackend {
    fn subscribe_properties(&self, handler: PropertiesHandler) -> source::Result<()> {
        let mut slot = self
            .handler
            .lock()
            .map_err(|_| BackendError::Unavailable("handler slot poisoned".to_string()))?;
        *slot = Some(handler);
        Ok(())
    }

    fn has_player(&self) -> bool {
        self.player_path().is_some()
    }

    fn play(&self) -> source::Result<()> {
        self.queue(PlayerCommand::Play)
    }

    fn pause(&self) -> source::Result<()> {
        self.queue(PlayerCommand::Pause)
    }

    fn stop(&self) -> source::Result<()> {
        self.queue(PlayerCommand::Stop)
    }

    fn next(&self) -> source::Result<()> {
        self.queue(PlayerCommand::Next)
    }

    fn previous(&self) -> source::Result<()> {
        self.queue(PlayerCommand::Previous)
    }

    fn close(&self) {
        // Dropping the sender ends the command thread
        let commands = self.commands.lock().ok().and_then(|mut commands| commands.take());
        let child = self.monitor.lock().ok().and_then(|mut child| child.take());
        if let Some(mut child) = child {
            if let Err(e) = child.kill() {
                debug!(error = %e, "busctl monitor already exited");
            }
            let _ = child.wait();
        }
        if commands.is_some() {
            info!("BlueZ connection closed");
        }
    }
}

impl Drop for BluezBackend {
    fn drop(&mut self) {
        self.close();
    }
}
