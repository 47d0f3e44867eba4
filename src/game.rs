// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Game events carried over the broker and the narrow port through which handlers
//! reach the game state. Combat rules live behind [`GameState`] and are not part of
//! this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    pub rank: UnitRank,
    pub location: String,
}

/// Public view of a player at the time an event was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub username: String,
    pub units: Vec<Unit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: PlayerSnapshot,
    pub units: Vec<Unit>,
    pub to_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: PlayerSnapshot,
    pub defender: PlayerSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No conflict with the local player.
    Safe,
    /// The move lands on the local player's units.
    MakeWar,
    /// The local player's own move echoed back.
    SamePlayer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOutcome {
    NotInvolved,
    NoUnits,
    YouWon,
    OpponentWon,
    Draw,
}

/// Result of resolving a war from the local player's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

impl WarResolution {
    pub fn new(outcome: WarOutcome, winner: &str, loser: &str) -> Self {
        WarResolution {
            outcome,
            winner: winner.to_owned(),
            loser: loser.to_owned(),
        }
    }
}

/// Mutable game state of one player.
///
/// Implementations are shared between concurrently running subscriptions and must
/// do their own locking.
#[cfg_attr(test, mockall::automock)]
pub trait GameState: Send + Sync {
    fn username(&self) -> String;
    fn player_snapshot(&self) -> PlayerSnapshot;
    fn handle_pause(&self, state: &crate::routing::PlayingState);
    fn handle_move(&self, mv: &ArmyMove) -> MoveOutcome;
    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution;
}
