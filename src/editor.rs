use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::{
    config::{ConfigPatch, OverlayConfig, MAX_PLAYERS, RADIUS_INCREMENT},
    ebs::EbsClient,
    grimoire::{sample_grimoire, GrimoireSnapshot},
    platform::HostPlatform,
    protocol,
    secret::SecretKeyState,
};

/// Broadcaster-side session state: the single writable draft of the overlay
/// config, the preview seat count, and the secret-key lifecycle.
///
/// Mutations never validate; a drag can pass through out-of-range values
/// freely. Validation happens once, at the explicit save.
pub struct EditorState {
    draft: OverlayConfig,
    preview_players: i32,
    background_image: Option<String>,
    secret: SecretKeyState,
    channel_id: Option<String>,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            draft: OverlayConfig::default(),
            preview_players: 5,
            background_image: None,
            secret: SecretKeyState::default(),
            channel_id: None,
        }
    }
}

impl EditorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.draft
    }

    /// Shallow-merges a partial update into the draft and returns the new
    /// value for re-render.
    pub fn update(&mut self, patch: &ConfigPatch) -> &OverlayConfig {
        self.draft = self.draft.merged(patch);
        &self.draft
    }

    /// Replaces the whole draft, e.g. with the stored config at session start
    /// or a candidate posted by the control surface.
    pub fn replace_draft(&mut self, candidate: OverlayConfig) {
        self.draft = candidate;
    }

    pub fn nudge_up(&mut self) {
        let y = self.draft.y - 1;
        self.update(&ConfigPatch {
            y: Some(y),
            ..ConfigPatch::default()
        });
    }

    pub fn nudge_down(&mut self) {
        let y = self.draft.y + 1;
        self.update(&ConfigPatch {
            y: Some(y),
            ..ConfigPatch::default()
        });
    }

    pub fn nudge_left(&mut self) {
        let x = self.draft.x - 1;
        self.update(&ConfigPatch {
            x: Some(x),
            ..ConfigPatch::default()
        });
    }

    pub fn nudge_right(&mut self) {
        let x = self.draft.x + 1;
        self.update(&ConfigPatch {
            x: Some(x),
            ..ConfigPatch::default()
        });
    }

    pub fn grow_token(&mut self) {
        let token_size = self.draft.token_size + 1;
        self.update(&ConfigPatch {
            token_size: Some(token_size),
            ..ConfigPatch::default()
        });
    }

    pub fn shrink_token(&mut self) {
        let token_size = self.draft.token_size - 1;
        self.update(&ConfigPatch {
            token_size: Some(token_size),
            ..ConfigPatch::default()
        });
    }

    pub fn expand_radius(&mut self) {
        let radius = self.draft.radius + RADIUS_INCREMENT;
        self.update(&ConfigPatch {
            radius: Some(radius),
            ..ConfigPatch::default()
        });
    }

    pub fn contract_radius(&mut self) {
        let radius = self.draft.radius - RADIUS_INCREMENT;
        self.update(&ConfigPatch {
            radius: Some(radius),
            ..ConfigPatch::default()
        });
    }

    /// Adds a preview seat. Editor-local only; the draft's `players` field is
    /// untouched until a config save carries it.
    pub fn add_preview_player(&mut self) {
        if self.preview_players < MAX_PLAYERS {
            self.preview_players += 1;
        }
    }

    pub fn remove_preview_player(&mut self) {
        if self.preview_players > 0 {
            self.preview_players -= 1;
        }
    }

    pub fn preview_players(&self) -> i32 {
        self.preview_players
    }

    /// Alignment backdrop for the editor page. Session-local only; never part
    /// of the saved config.
    pub fn set_background_image(&mut self, source: impl Into<String>) {
        self.background_image = Some(source.into());
    }

    pub fn background_image(&self) -> Option<&str> {
        self.background_image.as_deref()
    }

    /// Mock grimoire matching the preview seat count, for positioning the
    /// circle without a live game.
    pub fn preview_grimoire(&self) -> GrimoireSnapshot {
        sample_grimoire(self.preview_players)
    }

    /// Validates the draft and, only when it passes, writes the durable slot
    /// and fans out a `config` broadcast. An out-of-range draft leaves both
    /// channels untouched.
    pub fn save(&self, platform: &dyn HostPlatform) -> Result<()> {
        if !self.draft.validate() {
            bail!("refusing to save out-of-range config: {:?}", self.draft);
        }
        let content =
            serde_json::to_string(&self.draft).context("failed serializing config draft")?;
        platform.set_broadcaster_config(&content)?;
        platform.send_broadcast(&protocol::config_envelope(&self.draft)?)?;
        info!(settings = %content, "saved overlay config");
        Ok(())
    }

    pub fn set_channel(&mut self, channel_id: impl Into<String>) {
        self.channel_id = Some(channel_id.into());
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn adopt_secret(&mut self, secret: String) {
        self.secret.adopt(secret);
    }

    pub fn regenerate_secret(&mut self) -> String {
        self.secret.regenerate().to_owned()
    }

    pub fn edit_displayed_secret(&mut self, text: impl Into<String>) {
        self.secret.set_displayed(text);
    }

    pub fn displayed_secret(&self) -> Option<&str> {
        self.secret.displayed()
    }

    /// Secret cleared for a backend save, or `None` when the displayed copy
    /// no longer matches and the save must be dropped before any request.
    pub fn secret_for_save(&self) -> Option<&str> {
        let confirmed = self.secret.confirmed();
        if confirmed.is_none() {
            warn!("displayed secret does not match the generated value; save dropped");
        }
        confirmed
    }

    /// Fire-and-forget backend save of the confirmed secret. Returns `false`
    /// when the mismatch check or a missing channel drops the save before any
    /// request is spawned; the spawned request itself only ever logs.
    pub fn spawn_secret_save(&self, ebs: &EbsClient) -> bool {
        let Some(secret) = self.secret_for_save() else {
            return false;
        };
        let Some(channel_id) = self.channel_id.as_deref() else {
            warn!("no channel authorized; secret save dropped");
            return false;
        };
        let ebs = ebs.clone();
        let secret = secret.to_owned();
        let channel_id = channel_id.to_owned();
        tokio::spawn(async move {
            if let Err(err) = ebs.save_secret_key(&secret, &channel_id).await {
                warn!(?err, "secret key save failed");
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::EditorState;
    use crate::{
        config::{parse_config_update, ConfigPatch, OverlayConfig},
        ebs::EbsClient,
        platform::testing::RecordingPlatform,
        protocol::{parse_broadcast_message, BroadcastMessage},
    };

    #[test]
    fn nudges_move_the_center_by_one_percent() {
        let mut editor = EditorState::new();
        editor.nudge_up();
        editor.nudge_left();
        assert_eq!(editor.config().y, 49);
        assert_eq!(editor.config().x, 49);
        editor.nudge_down();
        editor.nudge_right();
        assert_eq!(editor.config().y, 50);
        assert_eq!(editor.config().x, 50);
    }

    #[test]
    fn radius_steps_use_the_fixed_increment() {
        let mut editor = EditorState::new();
        editor.expand_radius();
        assert_eq!(editor.config().radius, 220);
        editor.contract_radius();
        editor.contract_radius();
        assert_eq!(editor.config().radius, 200);
    }

    #[test]
    fn update_tolerates_out_of_range_intermediate_drafts() {
        let mut editor = EditorState::new();
        editor.update(&ConfigPatch {
            radius: Some(450),
            y: Some(-5),
            ..ConfigPatch::default()
        });
        assert_eq!(editor.config().radius, 450);
        assert_eq!(editor.config().y, -5);
        assert!(!editor.config().validate());
    }

    #[test]
    fn preview_players_stay_within_bounds() {
        let mut editor = EditorState::new();
        for _ in 0..40 {
            editor.add_preview_player();
        }
        assert_eq!(editor.preview_players(), 20);
        assert_eq!(editor.preview_grimoire().players.len(), 20);

        for _ in 0..40 {
            editor.remove_preview_player();
        }
        assert_eq!(editor.preview_players(), 0);
        assert!(editor.preview_grimoire().players.is_empty());
    }

    #[test]
    fn save_writes_slot_and_broadcasts_once() {
        let mut editor = EditorState::new();
        editor.nudge_right();
        let platform = RecordingPlatform::default();

        editor.save(&platform).expect("default-derived draft should save");

        let stored = platform.stored.borrow().clone().expect("slot should be written");
        let reloaded = parse_config_update(&stored).expect("stored config should re-validate");
        assert_eq!(reloaded.x, 51);

        let broadcasts = platform.broadcasts.borrow();
        assert_eq!(broadcasts.len(), 1);
        let envelope = parse_broadcast_message(&broadcasts[0]).expect("should parse own envelope");
        match envelope {
            BroadcastMessage::Config { settings } => assert_eq!(settings["x"], 51),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn save_rejects_out_of_range_draft_without_side_effects() {
        let mut editor = EditorState::new();
        editor.replace_draft(OverlayConfig {
            radius: 450,
            ..OverlayConfig::default()
        });
        let platform = RecordingPlatform::default();

        assert!(editor.save(&platform).is_err());
        assert!(platform.stored.borrow().is_none());
        assert!(platform.broadcasts.borrow().is_empty());
    }

    #[test]
    fn edited_secret_blocks_backend_save() {
        let mut editor = EditorState::new();
        editor.regenerate_secret();
        assert!(editor.secret_for_save().is_some());

        editor.edit_displayed_secret("not the generated value");
        assert!(editor.secret_for_save().is_none());
    }

    #[test]
    fn mismatched_secret_never_spawns_a_request() {
        let mut editor = EditorState::new();
        editor.set_channel("chan-1");
        editor.regenerate_secret();
        editor.edit_displayed_secret("tampered");
        // Would panic outside a runtime if a request task were spawned.
        let ebs = EbsClient::new("http://localhost:3000", None);
        assert!(!editor.spawn_secret_save(&ebs));
    }

    #[tokio::test]
    async fn confirmed_secret_save_is_fire_and_forget() {
        let mut editor = EditorState::new();
        editor.set_channel("chan-1");
        editor.regenerate_secret();
        // Nothing listens on this port; the spawned request fails quietly.
        let ebs = EbsClient::new("http://127.0.0.1:9", None);
        assert!(editor.spawn_secret_save(&ebs));
    }

    #[test]
    fn background_image_stays_out_of_the_draft() {
        let mut editor = EditorState::new();
        editor.set_background_image("data:image/png;base64,Zm9v");
        assert_eq!(
            editor.background_image(),
            Some("data:image/png;base64,Zm9v")
        );
        let serialized = serde_json::to_value(editor.config()).expect("should serialize");
        assert!(serialized.get("backgroundImage").is_none());
    }
}
