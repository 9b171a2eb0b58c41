use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::MAX_PLAYERS;

/// One seat in the grimoire. `role` is always present (coerced to an empty
/// string upstream when the source carries a non-string role object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrimoirePlayer {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl GrimoirePlayer {
    pub fn role_only(role: &str) -> Self {
        Self {
            role: role.to_owned(),
            name: None,
            id: None,
        }
    }
}

/// Live game state relayed from the companion tool. Viewers treat this as
/// opaque pass-through; only the companion relay builds it field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrimoireSnapshot {
    pub session: Option<String>,
    pub player_id: Option<String>,
    pub is_host: bool,
    pub players: Vec<GrimoirePlayer>,
    pub bluffs: Vec<Value>,
    pub edition: Value,
}

impl Default for GrimoireSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            player_id: None,
            is_host: false,
            players: Vec::new(),
            bluffs: Vec::new(),
            edition: Value::Object(Map::new()),
        }
    }
}

/// Session announcement pushed to the backend when the relay starts, stops,
/// or the process unloads. The unload beacon additionally carries the last
/// known player list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnnouncement {
    pub session: Option<String>,
    pub player_id: Option<String>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<GrimoirePlayer>>,
}

/// Troupe used by the config editor to preview token slots without a live
/// game: the base three-script roster in seating order.
pub const SAMPLE_ROLES: [&str; 20] = [
    "washerwoman",
    "librarian",
    "investigator",
    "chef",
    "empath",
    "fortuneteller",
    "undertaker",
    "monk",
    "ravenkeeper",
    "virgin",
    "slayer",
    "soldier",
    "mayor",
    "butler",
    "drunk",
    "recluse",
    "saint",
    "imp",
    "baron",
    "spy",
];

/// Mock grimoire with the requested number of preview seats.
pub fn sample_grimoire(player_count: i32) -> GrimoireSnapshot {
    let count = player_count.clamp(0, MAX_PLAYERS) as usize;
    GrimoireSnapshot {
        players: SAMPLE_ROLES[..count]
            .iter()
            .map(|role| GrimoirePlayer::role_only(role))
            .collect(),
        ..GrimoireSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::{sample_grimoire, GrimoireSnapshot, SessionAnnouncement, SAMPLE_ROLES};

    #[test]
    fn sample_grimoire_takes_roles_in_seating_order() {
        let grimoire = sample_grimoire(5);
        assert_eq!(grimoire.players.len(), 5);
        assert_eq!(grimoire.players[0].role, "washerwoman");
        assert_eq!(grimoire.players[4].role, "empath");
    }

    #[test]
    fn sample_grimoire_clamps_to_roster_bounds() {
        assert_eq!(sample_grimoire(-3).players.len(), 0);
        assert_eq!(sample_grimoire(99).players.len(), SAMPLE_ROLES.len());
    }

    #[test]
    fn snapshot_serializes_with_camel_case_keys() {
        let snapshot = GrimoireSnapshot {
            player_id: Some("p1".to_owned()),
            is_host: true,
            ..GrimoireSnapshot::default()
        };
        let value = serde_json::to_value(&snapshot).expect("should serialize");
        assert_eq!(value["playerId"], "p1");
        assert_eq!(value["isHost"], true);
        assert!(value["edition"].is_object());
    }

    #[test]
    fn announcement_omits_players_unless_set() {
        let announcement = SessionAnnouncement {
            session: Some("abc".to_owned()),
            player_id: None,
            is_active: false,
            players: None,
        };
        let value = serde_json::to_value(&announcement).expect("should serialize");
        assert_eq!(value["isActive"], false);
        assert!(value.get("players").is_none());
    }
}
