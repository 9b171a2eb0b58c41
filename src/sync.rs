use crossbeam_channel::Receiver;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    config::{self, OverlayConfig},
    layout::{parse_display_resolution, DisplayResolution, LayoutParams},
    platform::{HostPlatform, PlatformEvent},
    protocol::{parse_broadcast_message, BroadcastMessage},
};

/// Read-only replica held by one overlay renderer instance. Fed by the
/// durable config snapshot at connect, live broadcast envelopes, and the
/// one-shot backend grimoire fetch; there is no write path back to the
/// editor. Invalid updates are dropped and the previous state stays exactly
/// as it was: last-valid-write-wins, not last-write-wins.
pub struct ViewerState {
    config: OverlayConfig,
    grimoire: Value,
    overlay_active: bool,
    resolution: Option<DisplayResolution>,
    channel_id: Option<String>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            config: OverlayConfig::default(),
            grimoire: Value::Object(Map::new()),
            overlay_active: false,
            resolution: None,
            channel_id: None,
        }
    }
}

impl ViewerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn grimoire(&self) -> &Value {
        &self.grimoire
    }

    /// Whether the overlay renders at all; a valid grimoire with
    /// `isActive: false` keeps it hidden.
    pub fn overlay_active(&self) -> bool {
        self.overlay_active
    }

    pub fn resolution(&self) -> Option<DisplayResolution> {
        self.resolution
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn layout(&self) -> LayoutParams {
        LayoutParams::derive(&self.config)
    }

    /// Applies serialized slot content fetched from the durable store.
    /// Malformed or out-of-range content is logged and the replica keeps its
    /// previous (possibly default) config.
    pub fn apply_config_content(&mut self, raw: &str) {
        if let Some(valid) = config::parse_config_update(raw) {
            self.config = valid;
        }
    }

    /// Routes one broadcast payload by its `type` tag. Unknown types are
    /// ignored without error.
    pub fn apply_broadcast(&mut self, raw: &str) {
        match parse_broadcast_message(raw) {
            Ok(BroadcastMessage::Config { settings }) => {
                if let Some(valid) = config::config_from_value(settings) {
                    self.config = valid;
                }
            }
            Ok(BroadcastMessage::Grimoire {
                grimoire,
                is_active,
            }) => {
                self.grimoire = grimoire;
                self.overlay_active = is_active;
            }
            Err(err) => {
                warn!(?err, payload = %raw, "ignored unknown broadcast payload");
            }
        }
    }

    /// Applies the connect-time backend fetch. Absent fields leave the
    /// replica alone, and the fetch can only switch the overlay on, never
    /// off.
    pub fn apply_grimoire_fetch(&mut self, is_active: Option<bool>, grimoire: Option<Value>) {
        if is_active == Some(true) {
            self.overlay_active = true;
        }
        if let Some(grimoire) = grimoire {
            self.grimoire = grimoire;
        }
    }

    pub fn set_resolution(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else {
            return;
        };
        match parse_display_resolution(raw) {
            Some(resolution) => self.resolution = Some(resolution),
            None => warn!(value = %raw, "ignored unparseable display resolution"),
        }
    }

    /// Applies one platform event. Events are handled strictly in arrival
    /// order with no buffering, dedup, or version comparison.
    pub fn handle_event(&mut self, event: PlatformEvent, platform: &dyn HostPlatform) {
        match event {
            PlatformEvent::Authorized { channel_id, .. } => {
                info!(channel = %channel_id, "viewer authorized");
                self.channel_id = Some(channel_id);
                if let Some(content) = platform.broadcaster_config() {
                    self.apply_config_content(&content);
                }
            }
            PlatformEvent::ConfigChanged => {
                if let Some(content) = platform.broadcaster_config() {
                    self.apply_config_content(&content);
                }
            }
            PlatformEvent::ContextChanged { display_resolution } => {
                self.set_resolution(display_resolution.as_deref());
            }
            PlatformEvent::Broadcast { message } => {
                self.apply_broadcast(&message);
            }
            PlatformEvent::GrimoireLoaded {
                is_active,
                grimoire,
            } => {
                self.apply_grimoire_fetch(is_active, grimoire);
            }
        }
    }
}

/// Drives a viewer replica off a platform event channel until the sending
/// side hangs up.
pub fn run_viewer(
    rx: Receiver<PlatformEvent>,
    platform: &dyn HostPlatform,
    state: &mut ViewerState,
) {
    while let Ok(event) = rx.recv() {
        state.handle_event(event, platform);
    }
}
