use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
};
use tracing::{info, warn};

use clocktower_overlay::{
    companion::{spawn_companion_relay, FileGrimoireSource, RelayConfig},
    config::{self, AppConfig, OverlayConfig},
    ebs::EbsClient,
    editor::EditorState,
    platform::{HostPlatform, LocalPlatform},
    protocol,
};

#[derive(Clone)]
struct AppState {
    editor: Arc<Mutex<EditorState>>,
    platform: Arc<LocalPlatform>,
    ebs: EbsClient,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (app_config, config_path) = AppConfig::load_or_create()?;
    info!(path = %config_path.display(), "loaded app config");

    let (broadcast_tx, _) = broadcast::channel::<String>(64);
    let store_path = app_config.store_path()?;
    let platform = Arc::new(LocalPlatform::new(store_path, broadcast_tx.clone()));

    let mut editor = EditorState::new();
    if !app_config.channel_id.is_empty() {
        editor.set_channel(app_config.channel_id.clone());
    }
    if let Some(content) = platform.broadcaster_config() {
        if let Some(existing) = config::parse_config_update(&content) {
            editor.replace_draft(existing);
        }
    }
    let editor = Arc::new(Mutex::new(editor));

    let ebs = EbsClient::new(
        app_config.ebs_url.clone(),
        app_config.identity_token.clone(),
    );

    if app_config.channel_id.is_empty() {
        info!("channel_id is empty; skipping secret key fetch");
    } else {
        let ebs_secret = ebs.clone();
        let editor_secret = editor.clone();
        let channel_id = app_config.channel_id.clone();
        tokio::spawn(async move {
            match ebs_secret.fetch_secret_key(&channel_id).await {
                Ok(Some(secret)) => {
                    editor_secret.lock().await.adopt_secret(secret);
                    info!(channel = %channel_id, "adopted stored secret key");
                }
                Ok(None) => info!(channel = %channel_id, "no secret key stored yet"),
                Err(err) => warn!(?err, channel = %channel_id, "secret key fetch failed"),
            }
        });
    }

    let relay_handle = if app_config.relay_enabled {
        let secret_key = app_config
            .secret_key
            .clone()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let source_path = app_config
            .grimoire_source_path
            .clone()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        match (secret_key, source_path) {
            (Some(secret_key), Some(source_path)) => Some(spawn_companion_relay(
                RelayConfig {
                    secret_key,
                    poll_interval: Duration::from_secs(app_config.relay_poll_secs.max(1)),
                },
                Box::new(FileGrimoireSource::new(source_path)),
                ebs.clone(),
                Some(broadcast_tx.clone()),
            )),
            (None, _) => {
                warn!("companion relay enabled but secret_key is empty");
                None
            }
            (_, None) => {
                warn!("companion relay enabled but grimoire_source_path is empty");
                None
            }
        }
    } else {
        info!("companion relay disabled (relay_enabled=false)");
        None
    };

    let bind = app_config.http_bind.trim();
    if !is_valid_http_bind(bind) {
        anyhow::bail!("invalid http_bind address: {bind}");
    }
    let state = AppState {
        editor,
        platform: platform.clone(),
        ebs: ebs.clone(),
    };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/config", get(get_config))
        .route("/config/save", post(save_config))
        .route("/secret/generate", post(generate_secret_key))
        .route("/secret/save", post(save_secret_key))
        .route("/overlay", get(overlay_upgrade))
        .with_state(state);

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid http bind address: {bind}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed binding listener on {addr}"))?;
    info!("overlay socket listening on ws://{addr}/overlay");
    info!("editor surface available at http://{addr}/config");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("axum serve failed")?;

    if let Some(handle) = relay_handle {
        handle.shutdown().await;
    }
    Ok(())
}

async fn get_config(State(state): State<AppState>) -> Json<OverlayConfig> {
    let editor = state.editor.lock().await;
    Json(editor.config().clone())
}

/// Editor save path: replace the draft with the posted candidate and run the
/// validated save. Out-of-range candidates stay in the draft (the editor
/// tolerates them) but neither the slot nor the broadcast channel is touched.
async fn save_config(State(state): State<AppState>, Json(payload): Json<Value>) -> StatusCode {
    let candidate = match serde_json::from_value::<OverlayConfig>(payload) {
        Ok(candidate) => candidate,
        Err(err) => {
            warn!(?err, "config save payload has wrong shape");
            return StatusCode::BAD_REQUEST;
        }
    };
    let mut editor = state.editor.lock().await;
    editor.replace_draft(candidate);
    match editor.save(state.platform.as_ref()) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            warn!(?err, "rejected config save");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn generate_secret_key(State(state): State<AppState>) -> Json<Value> {
    let mut editor = state.editor.lock().await;
    let secret = editor.regenerate_secret();
    Json(json!({ "secretKey": secret }))
}

/// Mirrors the save button: the posted value is the broadcaster's displayed
/// copy and must still match the generated value before anything is sent.
async fn save_secret_key(State(state): State<AppState>, Json(payload): Json<Value>) -> StatusCode {
    let Some(displayed) = payload.get("secretKey").and_then(Value::as_str) else {
        warn!("secret save payload is missing secretKey");
        return StatusCode::BAD_REQUEST;
    };
    let mut editor = state.editor.lock().await;
    editor.edit_displayed_secret(displayed);
    if editor.spawn_secret_save(&state.ebs) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

async fn overlay_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_overlay_socket(socket, state))
}

/// One connected overlay renderer: the durable config snapshot goes out
/// first, then live envelopes are forwarded in fan-out order until the
/// client hangs up.
async fn handle_overlay_socket(socket: WebSocket, state: AppState) {
    let mut fan_out = state.platform.subscribe();
    let (mut sender, mut receiver) = socket.split();

    if let Some(content) = state.platform.broadcaster_config() {
        if let Some(stored) = config::parse_config_update(&content) {
            match protocol::config_envelope(&stored) {
                Ok(envelope) => {
                    if sender.send(Message::Text(envelope.into())).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!(?err, "failed building connect-time config envelope"),
            }
        }
    }

    loop {
        tokio::select! {
            message = fan_out.recv() => match message {
                Ok(message) => {
                    if sender.send(Message::Text(message.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "overlay socket lagged behind fan-out");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(?err, "overlay socket receive error");
                    break;
                }
            },
        }
    }
}

fn is_valid_http_bind(value: &str) -> bool {
    value.parse::<SocketAddr>().is_ok()
}
