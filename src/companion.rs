use std::{fs, path::PathBuf, time::Duration};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    ebs::EbsClient,
    grimoire::{GrimoirePlayer, GrimoireSnapshot, SessionAnnouncement},
    protocol,
};

/// Where the companion tool's game state comes from. Mirrors the storage the
/// original tool exposes: raw string entries for the session pair, the player
/// list, and the local player id.
pub trait GrimoireSource: Send {
    fn session(&self) -> Option<String>;
    fn players(&self) -> Option<String>;
    fn player_id(&self) -> Option<String>;
}

/// File-backed source: one JSON object whose keys mirror the tool's storage
/// entries, e.g. `{"session": "[false,\"abc\"]", "players": "[...]"}`.
pub struct FileGrimoireSource {
    path: PathBuf,
}

impl FileGrimoireSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn entry(&self, key: &str) -> Option<String> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                debug!(?err, path = %self.path.display(), "grimoire source not readable");
                return None;
            }
        };
        let store = match serde_json::from_str::<Value>(&text) {
            Ok(store) => store,
            Err(err) => {
                warn!(?err, path = %self.path.display(), "grimoire source is not valid json");
                return None;
            }
        };
        store.get(key).and_then(Value::as_str).map(str::to_owned)
    }
}

impl GrimoireSource for FileGrimoireSource {
    fn session(&self) -> Option<String> {
        self.entry("session")
    }

    fn players(&self) -> Option<String> {
        self.entry("players")
    }

    fn player_id(&self) -> Option<String> {
        self.entry("playerId")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionIdentity {
    pub is_host: bool,
    pub session: Option<String>,
}

/// Decodes the stored session pair `[spectator, name]`; a falsy first entry
/// marks the host. Unparseable input degrades to "guest, no session".
pub fn parse_session(raw: &str) -> SessionIdentity {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(?err, "unable to parse session storage entry");
            return SessionIdentity::default();
        }
    };
    let entries = value.as_array().cloned().unwrap_or_default();
    SessionIdentity {
        is_host: !truthy(entries.first()),
        session: entries.get(1).and_then(Value::as_str).map(str::to_owned),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0) != 0.0,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Decodes the stored player list, coercing non-string roles to an empty
/// string the way the companion tool does.
pub fn parse_players(raw: &str) -> Vec<GrimoirePlayer> {
    let values = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(values) => values,
        Err(err) => {
            warn!(?err, "unable to parse players storage entry");
            return Vec::new();
        }
    };
    values.into_iter().map(player_from_value).collect()
}

fn player_from_value(value: Value) -> GrimoirePlayer {
    GrimoirePlayer {
        role: value
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        name: value.get("name").and_then(Value::as_str).map(str::to_owned),
        id: value.get("id").and_then(Value::as_str).map(str::to_owned),
    }
}

/// Rebuilds the relay snapshot from the source. Bluffs carry over from the
/// previous sample; the edition resets to an empty object each tick.
pub fn snapshot_from_source(
    source: &dyn GrimoireSource,
    prev: &GrimoireSnapshot,
) -> GrimoireSnapshot {
    let identity = source
        .session()
        .map(|raw| parse_session(&raw))
        .unwrap_or_default();
    GrimoireSnapshot {
        session: identity.session,
        player_id: source.player_id(),
        is_host: identity.is_host,
        players: source
            .players()
            .map(|raw| parse_players(&raw))
            .unwrap_or_default(),
        bluffs: prev.bluffs.clone(),
        edition: Value::Object(Map::new()),
    }
}

/// Change detection over the serialized form, so a push happens only when
/// the wire payload would actually differ.
pub fn snapshot_changed(prev: &GrimoireSnapshot, next: &GrimoireSnapshot) -> bool {
    serde_json::to_string(prev).ok() != serde_json::to_string(next).ok()
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub secret_key: String,
    pub poll_interval: Duration,
}

pub struct RelayHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Stops the poll loop and waits for the inactive session beacon to go
    /// out best-effort.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

pub fn spawn_companion_relay(
    relay: RelayConfig,
    source: Box<dyn GrimoireSource + Send>,
    ebs: EbsClient,
    local_tx: Option<broadcast::Sender<String>>,
) -> RelayHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        run_relay_loop(relay, source, ebs, local_tx, stop_rx).await;
    });
    RelayHandle { stop_tx, task }
}

async fn run_relay_loop(
    relay: RelayConfig,
    source: Box<dyn GrimoireSource + Send>,
    ebs: EbsClient,
    local_tx: Option<broadcast::Sender<String>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // Baseline sample before announcing, so the first tick only pushes a
    // grimoire if the source changes after startup.
    let mut state = snapshot_from_source(source.as_ref(), &GrimoireSnapshot::default());
    announce_session(&ebs, &relay.secret_key, &state, true).await;
    emit_relay_status(&local_tx, "WATCHING GRIMOIRE", true);
    info!(interval = ?relay.poll_interval, "watching grimoire");

    loop {
        tokio::select! {
            _ = sleep(relay.poll_interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let next = snapshot_from_source(source.as_ref(), &state);
        if !snapshot_changed(&state, &next) {
            continue;
        }
        state = next;
        if let Err(err) = ebs.push_grimoire(&relay.secret_key, &state).await {
            warn!(?err, "grimoire push failed");
        }
        publish_grimoire(&local_tx, &state);
    }

    ebs.send_unload_beacon(&relay.secret_key, &state).await;
    emit_relay_status(&local_tx, "STOPPED", false);
    info!("companion relay stopped");
}

async fn announce_session(ebs: &EbsClient, secret_key: &str, state: &GrimoireSnapshot, active: bool) {
    let announcement = SessionAnnouncement {
        session: state.session.clone(),
        player_id: state.player_id.clone(),
        is_active: active,
        players: None,
    };
    if let Err(err) = ebs.push_session(secret_key, &announcement).await {
        warn!(?err, "session announcement failed");
    }
}

fn publish_grimoire(local_tx: &Option<broadcast::Sender<String>>, state: &GrimoireSnapshot) {
    let Some(tx) = local_tx else {
        return;
    };
    let grimoire = match serde_json::to_value(state) {
        Ok(grimoire) => grimoire,
        Err(err) => {
            warn!(?err, "failed serializing grimoire for local fan-out");
            return;
        }
    };
    match protocol::grimoire_envelope(grimoire, true) {
        Ok(message) => {
            let _ = tx.send(message);
        }
        Err(err) => warn!(?err, "failed building grimoire envelope"),
    }
}

fn emit_relay_status(local_tx: &Option<broadcast::Sender<String>>, status: &str, active: bool) {
    let Some(tx) = local_tx else {
        return;
    };
    // Viewers that only know config/grimoire envelopes drop this by type.
    let payload = json!({
        "type": "relay_status",
        "status": status,
        "isActive": active,
        "at": Utc::now().to_rfc3339(),
    });
    let _ = tx.send(payload.to_string());
}
