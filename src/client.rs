// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Player Wiring
//!
//! Everything a player process needs on the broker: the three subscriptions feeding
//! the game-event handlers and the two kinds of messages a player publishes.
//!
//! | Subscription | Exchange | Queue | Key | Durability |
//! |---|---|---|---|---|
//! | pause | `peril_direct` | `pause.<user>` | `pause` | transient |
//! | army moves | `peril_topic` | `army_moves.<user>` | `army_moves.*` | transient |
//! | war | `peril_topic` | `war` (shared) | `war.*` | durable |
//!
//! All three are JSON encoded. Moves are published as JSON under
//! `army_moves.<user>`; game logs as bincode under `game_logs.<user>`.

use crate::{
    channel::BrokerConnection,
    dispatcher::{subscribe_json, Handler, Subscription},
    errors::AmqpError,
    game::{ArmyMove, GameState, RecognitionOfWar},
    handlers::{MoveHandler, PauseHandler, WarHandler},
    publisher::{publish_bincode, publish_json, Publisher, RabbitMQPublisher},
    queue::Durability,
    routing::{
        routing_key, wildcard, GameLog, PlayingState, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT,
        EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY, WAR_RECOGNITIONS_PREFIX,
    },
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where one of a player's subscriptions is declared and bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRoute {
    pub exchange: &'static str,
    pub queue: String,
    pub key: String,
    pub durability: Durability,
}

/// Pause broadcasts, one private queue per player.
pub fn pause_route(username: &str) -> PlayerRoute {
    PlayerRoute {
        exchange: EXCHANGE_PERIL_DIRECT,
        queue: routing_key(PAUSE_KEY, username),
        key: PAUSE_KEY.to_owned(),
        durability: Durability::Transient,
    }
}

/// Every player's moves, one private queue per player.
pub fn army_moves_route(username: &str) -> PlayerRoute {
    PlayerRoute {
        exchange: EXCHANGE_PERIL_TOPIC,
        queue: routing_key(ARMY_MOVES_PREFIX, username),
        key: wildcard(ARMY_MOVES_PREFIX),
        durability: Durability::Transient,
    }
}

/// War declarations, one queue shared by every player.
pub fn war_route() -> PlayerRoute {
    PlayerRoute {
        exchange: EXCHANGE_PERIL_TOPIC,
        queue: WAR_RECOGNITIONS_PREFIX.to_owned(),
        key: wildcard(WAR_RECOGNITIONS_PREFIX),
        durability: Durability::Durable,
    }
}

/// Attaches the pause, army-move and war handlers of the player behind `state`.
///
/// The move and war handlers publish follow-up events; each gets a publisher on a
/// channel of its own since they run on separate subscription tasks.
///
/// # Parameters
/// * `conn` - Connection every subscription and publisher channel is opened on
/// * `state` - The local player's game state, shared by the three handlers
///
/// # Returns
/// The running subscriptions in pause, army moves, war order. On the first failure
/// the subscriptions already started are stopped and the error is returned.
pub async fn subscribe_player(
    conn: &BrokerConnection,
    state: Arc<dyn GameState>,
) -> Result<Vec<Subscription>, AmqpError> {
    let username = state.username();
    let mut subscriptions = Vec::with_capacity(3);

    let started = async {
        subscriptions.push(
            subscribe_route::<PlayingState, _>(
                conn,
                &pause_route(&username),
                PauseHandler::new(state.clone()),
            )
            .await?,
        );

        let moves_publisher = RabbitMQPublisher::new(conn.open_channel().await?);
        subscriptions.push(
            subscribe_route::<ArmyMove, _>(
                conn,
                &army_moves_route(&username),
                MoveHandler::new(state.clone(), Arc::new(moves_publisher)),
            )
            .await?,
        );

        let war_publisher = RabbitMQPublisher::new(conn.open_channel().await?);
        subscriptions.push(
            subscribe_route::<RecognitionOfWar, _>(
                conn,
                &war_route(),
                WarHandler::new(state.clone(), Arc::new(war_publisher)),
            )
            .await?,
        );

        Ok::<_, AmqpError>(())
    }
    .await;

    match started {
        Ok(_) => {
            info!(username = %username, "player subscriptions running");
            Ok(subscriptions)
        }
        Err(err) => {
            for subscription in &subscriptions {
                subscription.handle.abort();
            }
            Err(err)
        }
    }
}

async fn subscribe_route<T, H>(
    conn: &BrokerConnection,
    route: &PlayerRoute,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    debug!(queue = %route.queue, key = %route.key, "subscribing player");
    subscribe_json::<T, _>(
        conn,
        route.exchange,
        &route.queue,
        &route.key,
        route.durability,
        handler,
    )
    .await
}

/// Announces a move made by `username` to every player.
pub async fn publish_move<P>(publisher: &P, username: &str, mv: &ArmyMove) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
{
    let key = routing_key(ARMY_MOVES_PREFIX, username);
    publish_json(publisher, EXCHANGE_PERIL_TOPIC, &key, mv).await
}

/// Result of a batch of game log publishes.
#[derive(Debug, Default)]
pub struct SpamReport {
    pub sent: usize,
    pub failures: Vec<AmqpError>,
}

/// Publishes one game log per message on behalf of `username`.
///
/// A failed publish does not stop the batch; every failure is logged and returned in
/// the report.
pub async fn publish_spam<P, I>(publisher: &P, username: &str, messages: I) -> SpamReport
where
    P: Publisher + ?Sized,
    I: IntoIterator<Item = String>,
{
    let key = routing_key(GAME_LOG_SLUG, username);
    let mut report = SpamReport::default();

    for message in messages {
        let log = GameLog {
            current_time: Utc::now(),
            message,
            username: username.to_owned(),
        };

        match publish_bincode(publisher, EXCHANGE_PERIL_TOPIC, &key, &log).await {
            Ok(_) => report.sent += 1,
            Err(err) => {
                warn!(error = err.to_string(), "cannot publish game log");
                report.failures.push(err);
            }
        }
    }

    report
}
