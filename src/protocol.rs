use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OverlayConfig;

/// Envelope carried on the broadcast channel between the broadcaster instance
/// and connected viewers. Payloads stay untyped here; `settings` is gated by
/// the config validator before a viewer trusts it, `grimoire` is applied as an
/// opaque replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    Config {
        settings: Value,
    },
    Grimoire {
        grimoire: Value,
        #[serde(default, rename = "isActive")]
        is_active: bool,
    },
}

/// Parses one broadcast payload. Unknown `type` tags come back as an error;
/// consumers log and drop those without touching their state.
pub fn parse_broadcast_message(text: &str) -> Result<BroadcastMessage> {
    serde_json::from_str::<BroadcastMessage>(text)
        .context("payload did not match a known broadcast envelope")
}

/// Serialized `config` envelope for a draft the editor is publishing.
pub fn config_envelope(config: &OverlayConfig) -> Result<String> {
    let settings = serde_json::to_value(config).context("failed serializing config settings")?;
    serde_json::to_string(&BroadcastMessage::Config { settings })
        .context("failed serializing config envelope")
}

/// Serialized `grimoire` envelope relayed to viewers.
pub fn grimoire_envelope(grimoire: Value, is_active: bool) -> Result<String> {
    serde_json::to_string(&BroadcastMessage::Grimoire {
        grimoire,
        is_active,
    })
    .context("failed serializing grimoire envelope")
}

#[cfg(test)]
mod tests {
    use super::{config_envelope, parse_broadcast_message, BroadcastMessage};
    use crate::config::OverlayConfig;

    #[test]
    fn parses_config_envelope() {
        let payload = r#"{
            "type": "config",
            "settings": {"players": 5, "radius": 210, "x": 50, "y": 50, "tokenSize": 10}
        }"#;
        let parsed = parse_broadcast_message(payload).expect("expected config envelope");
        assert!(matches!(parsed, BroadcastMessage::Config { .. }));
    }

    #[test]
    fn parses_grimoire_envelope_with_active_flag() {
        let payload = r#"{
            "type": "grimoire",
            "grimoire": {"players": [{"role": "imp"}]},
            "isActive": false
        }"#;
        let parsed = parse_broadcast_message(payload).expect("expected grimoire envelope");
        match parsed {
            BroadcastMessage::Grimoire { is_active, .. } => assert!(!is_active),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn grimoire_envelope_defaults_to_inactive_without_flag() {
        let payload = r#"{"type": "grimoire", "grimoire": {}}"#;
        let parsed = parse_broadcast_message(payload).expect("expected grimoire envelope");
        match parsed {
            BroadcastMessage::Grimoire { is_active, .. } => assert!(!is_active),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_envelope_type() {
        assert!(parse_broadcast_message(r#"{"type": "emote", "emote": "pog"}"#).is_err());
        assert!(parse_broadcast_message("not json").is_err());
    }

    #[test]
    fn config_envelope_round_trips_through_parser() {
        let envelope = config_envelope(&OverlayConfig::default()).expect("should serialize");
        let parsed = parse_broadcast_message(&envelope).expect("expected own envelope to parse");
        match parsed {
            BroadcastMessage::Config { settings } => {
                assert_eq!(settings["tokenSize"], 10);
                assert_eq!(settings["players"], 12);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
