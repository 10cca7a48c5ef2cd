//! Pure phase derivation: from an optional [`GameSnapshot`] to the view
//! composition the UI should render.
//!
//! [`GameView::derive`] is a total, referentially transparent function with
//! no retained history: identical input always yields an identical
//! selection. It never initiates a transition itself — it simply recomputes
//! on every accepted new version observed through the cache. Because the
//! cache only surfaces strictly increasing versions per key, a view derived
//! from successive accepted snapshots can never regress to an earlier phase
//! within one continuous subscription.

use crate::snapshot::{GamePhase, GameSnapshot, RoundInfo};

/// The view composition selected for a game snapshot.
///
/// A closed set consumed via exhaustive matching, so adding a phase is a
/// compile-time-checked change everywhere a view is rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GameView<'a> {
    /// Players are gathering; render the lobby with the join code.
    Lobby { snapshot: &'a GameSnapshot },
    /// A game is in progress; render the round board.
    ///
    /// `round` is `None` between rounds (e.g. while the backend resolves
    /// placements) — the board renders without an active card.
    Active {
        snapshot: &'a GameSnapshot,
        round: Option<&'a RoundInfo>,
    },
    /// The game is over; render final scores and timelines.
    Finished { snapshot: &'a GameSnapshot },
    /// No snapshot exists for the requested game. Not a fault.
    NotFound,
}

impl<'a> GameView<'a> {
    /// Derive the view for a snapshot, or [`GameView::NotFound`] for an
    /// absent one.
    ///
    /// `lobby` and `finished` map directly; every other phase is one active
    /// state (the wire enum already collapses unknown sub-phases into
    /// [`GamePhase::Active`], so there is no per-sub-phase branching here).
    pub fn derive(snapshot: Option<&'a GameSnapshot>) -> Self {
        let Some(snapshot) = snapshot else {
            return Self::NotFound;
        };
        match snapshot.phase {
            GamePhase::Lobby => Self::Lobby { snapshot },
            GamePhase::Finished => Self::Finished { snapshot },
            GamePhase::Active => Self::Active {
                snapshot,
                round: snapshot.current_round.as_ref(),
            },
        }
    }

    /// The phase this view was derived from, if a snapshot was present.
    pub fn phase(&self) -> Option<GamePhase> {
        match self {
            Self::Lobby { .. } => Some(GamePhase::Lobby),
            Self::Active { .. } => Some(GamePhase::Active),
            Self::Finished { .. } => Some(GamePhase::Finished),
            Self::NotFound => None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::snapshot::TimelineCard;
    use uuid::Uuid;

    fn snapshot(phase: GamePhase, round: Option<RoundInfo>) -> GameSnapshot {
        GameSnapshot {
            id: Uuid::from_u128(1),
            join_code: "STONE-AGE".into(),
            phase,
            players: vec![],
            current_round: round,
            per_player_timeline: vec![],
        }
    }

    fn round(number: u32) -> RoundInfo {
        RoundInfo {
            number,
            card: TimelineCard {
                id: Uuid::from_u128(7),
                title: "Printing press".into(),
                year: 1440,
            },
        }
    }

    #[test]
    fn absent_snapshot_is_not_found() {
        assert_eq!(GameView::derive(None), GameView::NotFound);
        assert_eq!(GameView::derive(None).phase(), None);
    }

    #[test]
    fn lobby_maps_directly() {
        let snap = snapshot(GamePhase::Lobby, None);
        let view = GameView::derive(Some(&snap));
        assert!(matches!(view, GameView::Lobby { .. }));
        assert_eq!(view.phase(), Some(GamePhase::Lobby));
    }

    #[test]
    fn finished_maps_directly() {
        let snap = snapshot(GamePhase::Finished, None);
        assert!(matches!(
            GameView::derive(Some(&snap)),
            GameView::Finished { .. }
        ));
    }

    #[test]
    fn active_carries_the_current_round() {
        let snap = snapshot(GamePhase::Active, Some(round(2)));
        match GameView::derive(Some(&snap)) {
            GameView::Active { round, .. } => {
                assert_eq!(round.map(|r| r.number), Some(2));
            }
            other => panic!("expected Active, got {other:?}"),
        }
    }

    #[test]
    fn active_between_rounds_has_no_round() {
        let snap = snapshot(GamePhase::Active, None);
        match GameView::derive(Some(&snap)) {
            GameView::Active { round, .. } => assert!(round.is_none()),
            other => panic!("expected Active, got {other:?}"),
        }
    }

    #[test]
    fn derivation_is_referentially_transparent() {
        let snap = snapshot(GamePhase::Active, Some(round(3)));
        assert_eq!(
            GameView::derive(Some(&snap)),
            GameView::derive(Some(&snap))
        );
    }
}
