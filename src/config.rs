use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const MIN_TOKEN_SIZE: i32 = 8;
pub const MAX_TOKEN_SIZE: i32 = 17;

pub const MIN_RADIUS: i32 = 100;
pub const MAX_RADIUS: i32 = 400;
pub const RADIUS_INCREMENT: i32 = 10;

pub const WINDOW_MAX: i32 = 100;

pub const MAX_PLAYERS: i32 = 20;

/// The broadcaster-owned overlay layout, persisted to the durable config slot
/// and fanned out to viewers inside `config` broadcast envelopes.
///
/// `x`/`y` are the layout center as a percentage of the viewport, `radius` is
/// the token circle radius in pixels at reference resolution, `token_size` is
/// the relative size class applied to each token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    pub players: i32,
    pub radius: i32,
    pub x: i32,
    pub y: i32,
    pub token_size: i32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            players: 12,
            radius: 210,
            x: 50,
            y: 50,
            token_size: 10,
        }
    }
}

/// Partial update merged into a draft by the config editor. Unset fields keep
/// their prior value. No validation happens here; out-of-range intermediate
/// drafts are tolerated until an explicit save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub players: Option<i32>,
    pub radius: Option<i32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub token_size: Option<i32>,
}

impl OverlayConfig {
    /// Closed-range check applied to any config arriving from an external
    /// source. All fields must pass; a single failure rejects the whole
    /// object, never a partial application.
    pub fn validate(&self) -> bool {
        if self.players < 0 {
            return false;
        }
        if self.radius < MIN_RADIUS || self.radius > MAX_RADIUS {
            return false;
        }
        if self.token_size < MIN_TOKEN_SIZE || self.token_size > MAX_TOKEN_SIZE {
            return false;
        }
        if self.x < 0 || self.x > WINDOW_MAX {
            return false;
        }
        if self.y < 0 || self.y > WINDOW_MAX {
            return false;
        }
        true
    }

    /// Returns a new config with the patch shallow-merged on top of `self`.
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        Self {
            players: patch.players.unwrap_or(self.players),
            radius: patch.radius.unwrap_or(self.radius),
            x: patch.x.unwrap_or(self.x),
            y: patch.y.unwrap_or(self.y),
            token_size: patch.token_size.unwrap_or(self.token_size),
        }
    }
}

/// Parses and validates a serialized config from an untrusted source (the
/// durable config slot or a broadcast payload). Malformed or out-of-range
/// input is logged and yields `None`; callers keep their previous state.
pub fn parse_config_update(raw: &str) -> Option<OverlayConfig> {
    let candidate = match serde_json::from_str::<OverlayConfig>(raw) {
        Ok(candidate) => candidate,
        Err(err) => {
            warn!(?err, "unable to parse config payload");
            return None;
        }
    };
    validated(candidate)
}

/// Same gate as [`parse_config_update`] for an already-parsed JSON value
/// (the `settings` field of a broadcast envelope).
pub fn config_from_value(value: Value) -> Option<OverlayConfig> {
    let candidate = match serde_json::from_value::<OverlayConfig>(value) {
        Ok(candidate) => candidate,
        Err(err) => {
            warn!(?err, "config payload has wrong shape");
            return None;
        }
    };
    validated(candidate)
}

fn validated(candidate: OverlayConfig) -> Option<OverlayConfig> {
    if !candidate.validate() {
        warn!(?candidate, "rejected out-of-range config");
        return None;
    }
    Some(candidate)
}

/// Runtime configuration of the native host process, persisted as JSON under
/// the OS config directory and created with defaults on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ebs_url: String,
    pub http_bind: String,
    pub channel_id: String,
    pub identity_token: Option<String>,
    pub secret_key: Option<String>,
    pub relay_enabled: bool,
    pub grimoire_source_path: Option<String>,
    pub relay_poll_secs: u64,
    pub config_store_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ebs_url: "http://localhost:3000".to_owned(),
            http_bind: "127.0.0.1:37320".to_owned(),
            channel_id: String::new(),
            identity_token: None,
            secret_key: None,
            relay_enabled: false,
            grimoire_source_path: None,
            relay_poll_secs: 5,
            config_store_path: None,
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<(Self, PathBuf)> {
        let config_dir = config_dir()?;
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed creating config dir at {}", config_dir.display()))?;

        let config_path = config_dir.join("config.json");
        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("invalid json in {}", config_path.display()))?;
        Ok((config, config_path))
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    /// Path of the durable broadcaster config slot. Falls back to a file next
    /// to the app config when not set explicitly.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = self
            .config_store_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(PathBuf::from(path));
        }
        Ok(config_dir()?.join("broadcaster_config.json"))
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("unable to locate OS config directory")?
        .join("clocktower-overlay"))
}
