// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Game Event Handlers
//!
//! Adapts the game-state port to the dispatch layer. Each domain outcome resolves to a
//! [`MoveDisposition`] or [`WarDisposition`] through a single declared table per event
//! type; a disposition either settles the delivery directly or first publishes a
//! follow-up event. A follow-up that fails to publish requeues the original delivery
//! so the cascade is retried on redelivery.
//!
//! Handlers run on their subscription's task, so each publishing handler must be given
//! a [`Publisher`] of its own rather than one shared with another subscription.

use crate::{
    dispatcher::{AckType, Handler},
    errors::AmqpError,
    game::{ArmyMove, GameState, MoveOutcome, RecognitionOfWar, WarOutcome, WarResolution},
    publisher::{publish_bincode, publish_json, Publisher},
    routing::{
        routing_key, GameLog, PlayingState, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG,
        WAR_RECOGNITIONS_PREFIX,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use std::{path::PathBuf, sync::Arc};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// What the move handler does with a delivery once the domain has decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDisposition {
    /// Settle immediately.
    Settle(AckType),
    /// Publish a war declaration against the mover, then ack.
    DeclareWar,
}

/// What the war handler does with a delivery once the domain has decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarDisposition {
    /// Settle immediately.
    Settle(AckType),
    /// Publish a game log with this message, then ack.
    RecordWar(String),
}

impl MoveOutcome {
    pub fn disposition(self) -> MoveDisposition {
        match self {
            MoveOutcome::Safe => MoveDisposition::Settle(AckType::Ack),
            MoveOutcome::MakeWar => MoveDisposition::DeclareWar,
            MoveOutcome::SamePlayer => MoveDisposition::Settle(AckType::NackDiscard),
        }
    }
}

impl WarResolution {
    pub fn disposition(&self) -> WarDisposition {
        match self.outcome {
            // another player's war; leave it for a consumer it concerns
            WarOutcome::NotInvolved => WarDisposition::Settle(AckType::NackRequeue),
            WarOutcome::NoUnits => WarDisposition::Settle(AckType::NackDiscard),
            WarOutcome::YouWon | WarOutcome::OpponentWon => WarDisposition::RecordWar(format!(
                "{} won a war against {}",
                self.winner, self.loser
            )),
            WarOutcome::Draw => WarDisposition::RecordWar(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
        }
    }
}

/// Outcome of a delivery whose disposition required a follow-up publish.
pub fn after_cascade(result: Result<(), AmqpError>) -> AckType {
    match result {
        Ok(_) => AckType::Ack,
        Err(err) => {
            warn!(error = err.to_string(), "follow-up publish failed, requeuing");
            AckType::NackRequeue
        }
    }
}

/// Applies pause/resume broadcasts.
pub struct PauseHandler {
    state: Arc<dyn GameState>,
}

impl PauseHandler {
    pub fn new(state: Arc<dyn GameState>) -> Self {
        PauseHandler { state }
    }
}

#[async_trait]
impl Handler<PlayingState> for PauseHandler {
    async fn handle(&self, msg: PlayingState) -> AckType {
        self.state.handle_pause(&msg);
        AckType::Ack
    }
}

/// Applies other players' army moves, declaring war on conflict.
pub struct MoveHandler {
    state: Arc<dyn GameState>,
    publisher: Arc<dyn Publisher>,
}

impl MoveHandler {
    pub fn new(state: Arc<dyn GameState>, publisher: Arc<dyn Publisher>) -> Self {
        MoveHandler { state, publisher }
    }
}

#[async_trait]
impl Handler<ArmyMove> for MoveHandler {
    async fn handle(&self, msg: ArmyMove) -> AckType {
        let outcome = self.state.handle_move(&msg);
        debug!(player = %msg.player.username, outcome = ?outcome, "army move handled");

        match outcome.disposition() {
            MoveDisposition::Settle(ack) => ack,
            MoveDisposition::DeclareWar => {
                let username = self.state.username();
                let war = RecognitionOfWar {
                    attacker: msg.player,
                    defender: self.state.player_snapshot(),
                };
                let key = routing_key(WAR_RECOGNITIONS_PREFIX, &username);
                after_cascade(
                    publish_json(self.publisher.as_ref(), EXCHANGE_PERIL_TOPIC, &key, &war).await,
                )
            }
        }
    }
}

/// Resolves wars and records their result in the game log.
pub struct WarHandler {
    state: Arc<dyn GameState>,
    publisher: Arc<dyn Publisher>,
}

impl WarHandler {
    pub fn new(state: Arc<dyn GameState>, publisher: Arc<dyn Publisher>) -> Self {
        WarHandler { state, publisher }
    }
}

#[async_trait]
impl Handler<RecognitionOfWar> for WarHandler {
    async fn handle(&self, msg: RecognitionOfWar) -> AckType {
        let resolution = self.state.handle_war(&msg);
        debug!(
            attacker = %msg.attacker.username,
            defender = %msg.defender.username,
            outcome = ?resolution.outcome,
            "war handled"
        );

        match resolution.disposition() {
            WarDisposition::Settle(ack) => ack,
            WarDisposition::RecordWar(message) => {
                let username = self.state.username();
                let log = GameLog {
                    current_time: Utc::now(),
                    message,
                    username: username.clone(),
                };
                let key = routing_key(GAME_LOG_SLUG, &username);
                after_cascade(
                    publish_bincode(self.publisher.as_ref(), EXCHANGE_PERIL_TOPIC, &key, &log)
                        .await,
                )
            }
        }
    }
}

/// Appends every game log as one line to a file.
pub struct GameLogHandler {
    path: PathBuf,
}

impl GameLogHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GameLogHandler { path: path.into() }
    }

    async fn append(&self, log: &GameLog) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let line = format!(
            "{} {}: {}\n",
            log.current_time.to_rfc3339(),
            log.username,
            log.message
        );
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl Handler<GameLog> for GameLogHandler {
    async fn handle(&self, msg: GameLog) -> AckType {
        match self.append(&msg).await {
            Ok(_) => {
                info!(username = %msg.username, message = %msg.message, "game log recorded");
                AckType::Ack
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    path = %self.path.display(),
                    "error writing game log"
                );
                AckType::NackRequeue
            }
        }
    }
}
