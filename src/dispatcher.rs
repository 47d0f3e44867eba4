// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Subscriber
//!
//! `subscribe*` declares and binds a queue, attaches a consumer and spawns one task
//! that runs the delivery loop for the lifetime of the channel. Each delivery is
//! decoded, handed to the caller's [`Handler`] and settled on the broker according to
//! the [`AckType`] the handler resolves to:
//!
//! | AckType | Broker action |
//! |---|---|
//! | `Ack` | ack |
//! | `NackRequeue` | nack, requeue |
//! | `NackDiscard` | nack, no requeue (dead-lettered) |
//!
//! Payloads that fail to decode never reach the handler and are discarded.

use crate::{
    channel::{BrokerConnection, AMQP_REPLY_SUCCESS},
    codec::{BincodeCodec, Codec, JsonCodec},
    consumer::consume_stream,
    errors::AmqpError,
    queue::Durability,
    topology::declare_and_bind,
};
use async_trait::async_trait;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Longest consumer tag the protocol can carry (AMQP short string)
const MAX_CONSUMER_TAG_LEN: usize = 255;

/// How a processed delivery is settled on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckType {
    /// Fully processed, remove from the queue.
    Ack,
    /// Transient failure, redeliver later, possibly to another consumer.
    NackRequeue,
    /// Unrecoverable, route to the dead letter exchange.
    #[default]
    NackDiscard,
}

impl AckType {
    /// `None` for an ack, otherwise the requeue flag of the nack.
    pub fn nack_requeue(self) -> Option<bool> {
        match self {
            AckType::Ack => None,
            AckType::NackRequeue => Some(true),
            AckType::NackDiscard => Some(false),
        }
    }
}

impl From<i64> for AckType {
    /// `0` ack, `1` requeue, `2` discard. Anything else is discarded: acking an
    /// unknown outcome would hide bugs and requeueing it could loop forever.
    fn from(code: i64) -> Self {
        match code {
            0 => AckType::Ack,
            1 => AckType::NackRequeue,
            _ => AckType::NackDiscard,
        }
    }
}

/// Processes one decoded message.
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    async fn handle(&self, msg: T) -> AckType;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckType> + Send,
{
    async fn handle(&self, msg: T) -> AckType {
        (self)(msg).await
    }
}

/// A running subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Name of the queue the broker assigned.
    pub queue: String,
    /// Delivery loop; completes once the delivery stream closes.
    pub handle: JoinHandle<()>,
}

/// `<queue>-<uuid>`, with the queue part cut short so the tag always fits in a short
/// string.
pub(crate) fn consumer_tag(queue: &str) -> String {
    let suffix = Uuid::new_v4().to_string();
    let mut room = MAX_CONSUMER_TAG_LEN - suffix.len() - 1;
    if room >= queue.len() {
        room = queue.len();
    }
    while !queue.is_char_boundary(room) {
        room -= 1;
    }
    format!("{}-{}", &queue[..room], suffix)
}

/// Subscribes `handler` to `queue_name` bound to `exchange` under `key`.
///
/// Returns once the consumer is attached; deliveries are processed sequentially on a
/// spawned task until the connection or channel closes. Setup failures are returned
/// before any delivery is read and leave no channel open.
///
/// # Parameters
/// * `conn` - Connection the subscription's dedicated channel is opened on
/// * `codec` - Encoding every delivery is decoded with
/// * `exchange` - Existing exchange the queue is bound to
/// * `queue_name` - Queue to declare or attach to
/// * `key` - Binding key
/// * `durability` - Lifetime policy of the queue; durable queues also limit prefetch
/// * `handler` - Receives each decoded message and decides how it is settled
///
/// # Returns
/// The running [`Subscription`], or the first declare, bind, QoS or consume error.
pub async fn subscribe<T, C, H>(
    conn: &BrokerConnection,
    codec: C,
    exchange: &str,
    queue_name: &str,
    key: &str,
    durability: Durability,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let (channel, queue) = declare_and_bind(conn, exchange, queue_name, key, durability).await?;

    if let Some(prefetch) = durability.prefetch() {
        if let Err(err) = channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), queue = %queue, "error to configure qos");
            close_channel(&channel).await;
            return Err(AmqpError::QoSDeclarationError(queue));
        }
    }

    let tag = consumer_tag(&queue);
    let consumer = match channel
        .basic_consume(
            &queue,
            &tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(error = err.to_string(), queue = %queue, "error to create the consumer");
            close_channel(&channel).await;
            return Err(AmqpError::ConsumerDeclarationError(queue));
        }
    };

    debug!(queue = %queue, exchange, key, "consumer attached");

    let handle = tokio::spawn({
        let queue = queue.clone();
        async move {
            // the channel lives exactly as long as its delivery loop
            let _channel = channel;
            consume_stream::<T, _, _, _, _, _>(consumer, &queue, &codec, &handler).await;
        }
    });

    Ok(Subscription { queue, handle })
}

/// [`subscribe`] with the JSON encoding.
pub async fn subscribe_json<T, H>(
    conn: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    durability: Durability,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe::<T, _, _>(conn, JsonCodec, exchange, queue_name, key, durability, handler).await
}

/// [`subscribe`] with the bincode encoding.
pub async fn subscribe_bincode<T, H>(
    conn: &BrokerConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    durability: Durability,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe::<T, _, _>(conn, BincodeCodec, exchange, queue_name, key, durability, handler).await
}

async fn close_channel(channel: &Channel) {
    if let Err(err) = channel.close(AMQP_REPLY_SUCCESS, "subscription aborted").await {
        warn!(error = err.to_string(), "error closing the channel");
    }
}
