// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Exchange names, routing-key conventions and the control payloads exchanged between
//! the Peril server and its clients.
//!
//! Routing keys are dot-separated: a fixed prefix per event category followed by the
//! entity (usually a username). Queues fan in with a `prefix.*` binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
pub const EXCHANGE_PERIL_DEAD_LETTER: &str = crate::queue::DEAD_LETTER_EXCHANGE;

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `prefix.entity`, e.g. `war.alice`.
pub fn routing_key(prefix: &str, entity: &str) -> String {
    format!("{prefix}.{entity}")
}

/// Binding pattern matching every entity under `prefix`, e.g. `war.*`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Pause/resume broadcast by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// One line of the game's history, written by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_prefix_dot_entity() {
        assert_eq!(routing_key(WAR_RECOGNITIONS_PREFIX, "alice"), "war.alice");
        assert_eq!(wildcard(GAME_LOG_SLUG), "game_logs.*");
        assert_eq!(EXCHANGE_PERIL_DEAD_LETTER, "peril_dlx");
    }
}
