// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Peril server: records every game log and broadcasts pause/resume.

use anyhow::Context;
use peril::{
    channel::{with_connection, BrokerConnection},
    config::Configs,
    dispatcher::subscribe_bincode,
    handlers::GameLogHandler,
    logging,
    publisher::{publish_json, RabbitMQPublisher},
    queue::Durability,
    routing::{
        wildcard, GameLog, PlayingState, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG, PAUSE_KEY,
    },
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "Possible commands:
* pause
* resume
* quit
* help";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Configs::load().context("loading configuration")?;
    logging::init(&cfg.app.log_level);

    info!("starting Peril server...");

    with_connection(&cfg.rabbitmq, &cfg.app.name, |conn| run(conn, cfg.clone()))
        .await
        .context("connecting to RabbitMQ")?
}

async fn run(conn: Arc<BrokerConnection>, cfg: Configs) -> anyhow::Result<()> {
    info!("connection to RabbitMQ successful");

    let publisher = RabbitMQPublisher::new(conn.open_channel().await?);

    let key = wildcard(GAME_LOG_SLUG);
    let subscription = subscribe_bincode::<GameLog, _>(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        &key,
        Durability::Durable,
        GameLogHandler::new(cfg.app.game_log_path.clone()),
    )
    .await
    .with_context(|| format!("subscribing to `{key}` on `{EXCHANGE_PERIL_TOPIC}`"))?;
    info!(queue = %subscription.queue, "recording game logs");

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(line) = line else {
            break;
        };

        let paused = match line.split_whitespace().next() {
            None => continue,
            Some("pause") => true,
            Some("resume") => false,
            Some("help") => {
                println!("{HELP}");
                continue;
            }
            Some("quit") => break,
            Some(other) => {
                warn!(command = other, "invalid command");
                continue;
            }
        };

        let state = PlayingState { is_paused: paused };
        match publish_json(&publisher, EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &state).await {
            Ok(_) => info!(paused, "playing state published"),
            Err(err) => warn!(error = err.to_string(), "could not publish playing state"),
        }
    }

    info!("shutting down");
    Ok(())
}
