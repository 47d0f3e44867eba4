// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declarer
//!
//! Declares (or attaches to) a dead-lettered queue and binds it to an existing
//! exchange. Exchanges themselves are configured outside this crate and only
//! referenced by name. Declaration is idempotent: the same definition always
//! produces the same declare flags and arguments, and re-binding an existing binding
//! is a no-op on the broker.
//!
//! Any failure is fatal for the subscription attempt; nothing is retried here.

use crate::{
    channel::{BrokerConnection, AMQP_REPLY_SUCCESS},
    errors::AmqpError,
    queue::{Durability, QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{options::QueueBindOptions, types::FieldTable, Channel, Queue};
use tracing::{debug, error, warn};

/// Declares the queue described by `def` on `channel`.
pub async fn declare_queue(channel: &Channel, def: &QueueDefinition) -> Result<Queue, AmqpError> {
    debug!(queue = def.name(), durability = ?def.durability(), "declaring queue");

    match channel
        .queue_declare(def.name(), def.declare_options(), def.arguments())
        .await
    {
        Ok(queue) => {
            debug!(queue = queue.name().as_str(), "queue declared");
            Ok(queue)
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = def.name(),
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError {
                queue: def.name().to_owned(),
                reason: err.to_string(),
            })
        }
    }
}

/// Binds a queue to an exchange.
pub async fn bind_queue(channel: &Channel, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            binding.queue_name,
            binding.exchange_name,
            binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError {
                exchange: binding.exchange_name.to_owned(),
                queue: binding.queue_name.to_owned(),
                key: binding.routing_key.to_owned(),
                reason: err.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Channel operations needed to install a queue, so the rollback rules can be
/// exercised without a broker.
#[async_trait]
pub(crate) trait TopologyChannel: Send + Sync {
    /// Declares the queue and returns the name the broker assigned.
    async fn declare(&self, def: &QueueDefinition) -> Result<String, AmqpError>;
    async fn bind(&self, binding: &QueueBinding<'_>) -> Result<(), AmqpError>;
    /// Gives up on the channel after a failed install.
    async fn abort(&self);
}

#[async_trait]
impl TopologyChannel for Channel {
    async fn declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        declare_queue(self, def)
            .await
            .map(|queue| queue.name().to_string())
    }

    async fn bind(&self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        bind_queue(self, binding).await
    }

    async fn abort(&self) {
        if let Err(err) = self.close(AMQP_REPLY_SUCCESS, "declaration failed").await {
            warn!(error = err.to_string(), "error closing the channel");
        }
    }
}

/// Declares `def` and binds it to `exchange` under `key`, aborting the channel on
/// any failure.
pub(crate) async fn install<C>(
    channel: &C,
    exchange: &str,
    def: &QueueDefinition,
    key: &str,
) -> Result<String, AmqpError>
where
    C: TopologyChannel + ?Sized,
{
    let installed = match channel.declare(def).await {
        Ok(queue) => {
            let binding = QueueBinding::new(&queue).exchange(exchange).routing_key(key);
            channel.bind(&binding).await.map(|_| queue.clone())
        }
        Err(err) => Err(err),
    };

    if installed.is_err() {
        channel.abort().await;
    }
    installed
}

/// Opens a dedicated channel, declares `queue_name` and binds it to `exchange` under
/// `key`.
///
/// On any failure the channel is closed and no queue name is returned: a partial
/// declare without its binding is never handed to the caller.
///
/// # Parameters
/// * `conn` - Connection the dedicated channel is opened on
/// * `exchange` - Existing exchange to bind to
/// * `queue_name` - Queue to declare; empty lets the broker pick a name
/// * `key` - Binding key, possibly a `prefix.*` pattern on topic exchanges
/// * `durability` - Lifetime policy of the queue
///
/// # Returns
/// The open channel together with the declared queue name, or the first declare or
/// bind error.
pub async fn declare_and_bind(
    conn: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    durability: Durability,
) -> Result<(Channel, String), AmqpError> {
    let def = QueueDefinition::new(queue_name, durability);
    declare_and_bind_definition(conn, exchange, &def, key).await
}

/// Same as [`declare_and_bind`] for a fully customized [`QueueDefinition`].
pub async fn declare_and_bind_definition(
    conn: &BrokerConnection,
    exchange: &str,
    def: &QueueDefinition,
    key: &str,
) -> Result<(Channel, String), AmqpError> {
    let channel = conn.open_channel().await?;
    let queue = install(&channel, exchange, def, key).await?;
    Ok((channel, queue))
}
