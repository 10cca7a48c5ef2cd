//! Game snapshot types produced by the Eras backend.
//!
//! A [`GameSnapshot`] is the authoritative state of one game as the backend
//! sees it. The client never mutates a snapshot — it only reads snapshots
//! out of cache entry values (see [`crate::cache`]) and derives a view from
//! them (see [`crate::phase`]).
//!
//! Field names are camelCase on the wire to match the backend's JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for games.
pub type GameId = Uuid;

/// Unique identifier for players.
pub type PlayerId = Uuid;

/// Discrete stage of a game.
///
/// The backend sends finer-grained stage strings during play (`"guessing"`,
/// `"reveal"`, `"scoring"`, …). Everything between lobby and finished is one
/// active state to the client, so unknown stage strings deserialize to
/// [`GamePhase::Active`] via the `#[serde(other)]` catch-all rather than
/// being branched per sub-phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    /// Players are gathering; the game has not started.
    #[default]
    Lobby,
    /// All rounds resolved; final scores are available.
    Finished,
    /// Rounds are being played.
    ///
    /// Declared last: the `other` catch-all must sit on the final variant.
    #[serde(other)]
    Active,
}

/// A dated card that players place on their timelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineCard {
    pub id: Uuid,
    /// Event title shown to players.
    pub title: String,
    /// Year the event occurred (negative = BCE).
    pub year: i32,
}

/// Information about a player in a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub connected: bool,
}

/// The round currently being played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    /// 1-based round number.
    pub number: u32,
    /// The card being placed this round.
    pub card: TimelineCard,
}

/// A card a player has already placed, with the resolution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedCard {
    pub card: TimelineCard,
    /// Whether the placement was chronologically correct.
    pub correct: bool,
}

/// One player's timeline of placed cards, in placement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTimeline {
    pub player_id: PlayerId,
    pub cards: Vec<PlacedCard>,
}

/// Authoritative snapshot of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: GameId,
    /// Short human-entered code used to join the game.
    pub join_code: String,
    pub phase: GamePhase,
    pub players: Vec<PlayerInfo>,
    /// Present while a round is in progress.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_round: Option<RoundInfo>,
    #[serde(default)]
    pub per_player_timeline: Vec<PlayerTimeline>,
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn known_phases_deserialize_directly() {
        assert_eq!(
            serde_json::from_str::<GamePhase>("\"lobby\"").unwrap(),
            GamePhase::Lobby
        );
        assert_eq!(
            serde_json::from_str::<GamePhase>("\"active\"").unwrap(),
            GamePhase::Active
        );
        assert_eq!(
            serde_json::from_str::<GamePhase>("\"finished\"").unwrap(),
            GamePhase::Finished
        );
    }

    #[test]
    fn unknown_phase_strings_map_to_active() {
        for raw in ["\"guessing\"", "\"reveal\"", "\"scoring\"", "\"round_end\""] {
            assert_eq!(
                serde_json::from_str::<GamePhase>(raw).unwrap(),
                GamePhase::Active,
                "{raw} should fall through to Active"
            );
        }
    }

    #[test]
    fn snapshot_round_trips_with_camel_case_fields() {
        let snapshot = GameSnapshot {
            id: Uuid::from_u128(1),
            join_code: "BRONZE-AGE".into(),
            phase: GamePhase::Active,
            players: vec![PlayerInfo {
                id: Uuid::from_u128(2),
                name: "Alice".into(),
                score: 3,
                connected: true,
            }],
            current_round: Some(RoundInfo {
                number: 4,
                card: TimelineCard {
                    id: Uuid::from_u128(3),
                    title: "Moon landing".into(),
                    year: 1969,
                },
            }),
            per_player_timeline: vec![],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"joinCode\""));
        assert!(json.contains("\"currentRound\""));
        assert!(json.contains("\"perPlayerTimeline\""));
        let back: GameSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn snapshot_without_round_or_timelines_deserializes() {
        let raw = serde_json::json!({
            "id": Uuid::from_u128(9),
            "joinCode": "IRON-AGE",
            "phase": "lobby",
            "players": [],
        });
        let snapshot: GameSnapshot = serde_json::from_value(raw).unwrap();
        assert!(snapshot.current_round.is_none());
        assert!(snapshot.per_player_timeline.is_empty());
    }
}
