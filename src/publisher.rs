// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Publisher
//!
//! Serializes a value with one of the two [`Codec`]s and publishes it to an exchange
//! under a routing key. Encoding happens before anything touches the network, so an
//! unrepresentable value never produces a half-sent message.
//!
//! By default publishing is best-effort: the broker's receipt is not awaited and a
//! message can be lost if the connection drops mid-send. [`RabbitMQPublisher::with_confirms`]
//! switches a publisher to confirm mode. In both modes a failed publish hands back the
//! attempted [`PublishMessage`] so the caller can retry it.

use crate::{
    codec::{BincodeCodec, Codec, JsonCodec},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties, Channel,
};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

/// A fully encoded message ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl PublishMessage {
    pub fn new(exchange: &str, routing_key: &str, content_type: &str, payload: Vec<u8>) -> Self {
        PublishMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            content_type: content_type.to_owned(),
            payload,
        }
    }
}

/// Sends already encoded messages to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, msg: PublishMessage) -> Result<(), AmqpError>;
}

/// [`Publisher`] writing to a channel it owns exclusively.
pub struct RabbitMQPublisher {
    channel: Channel,
    confirms: bool,
}

impl RabbitMQPublisher {
    /// Best-effort publisher: no publisher confirms are awaited.
    pub fn new(channel: Channel) -> RabbitMQPublisher {
        RabbitMQPublisher {
            channel,
            confirms: false,
        }
    }

    /// Puts the channel in confirm mode; every publish then waits for the broker's
    /// ack and reports a broker nack as [`AmqpError::PublishNotConfirmed`].
    pub async fn with_confirms(channel: Channel) -> Result<RabbitMQPublisher, AmqpError> {
        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
        {
            error!(error = err.to_string(), "error enabling publisher confirms");
            return Err(AmqpError::ChannelError(err.to_string()));
        }

        Ok(RabbitMQPublisher {
            channel,
            confirms: true,
        })
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(&self, msg: PublishMessage) -> Result<(), AmqpError> {
        let properties = BasicProperties::default()
            .with_content_type(msg.content_type.as_str().into())
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_headers(otel::inject_current_context());

        let confirm = match self
            .channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &msg.payload,
                properties,
            )
            .await
        {
            Ok(confirm) => confirm,
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = %msg.exchange,
                    routing_key = %msg.routing_key,
                    "error publishing message"
                );
                return Err(AmqpError::PublishingError(Box::new(msg)));
            }
        };

        if !self.confirms {
            return Ok(());
        }

        match confirm.await {
            Ok(confirmation) if confirmation.is_nack() => {
                error!(
                    exchange = %msg.exchange,
                    routing_key = %msg.routing_key,
                    "broker refused message"
                );
                Err(AmqpError::PublishNotConfirmed(Box::new(msg)))
            }
            Ok(_) => {
                debug!(routing_key = %msg.routing_key, "publish confirmed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "error awaiting publish confirmation");
                Err(AmqpError::PublishingError(Box::new(msg)))
            }
        }
    }
}

/// Encodes `value` with `codec` and publishes it.
///
/// Encoding happens first; a value the codec cannot represent is reported as
/// [`AmqpError::EncodeError`] and nothing is sent.
///
/// # Parameters
/// * `publisher` - Publisher owning the channel the message goes out on
/// * `codec` - Encoding, also decides the content type tag
/// * `exchange` - Existing exchange to publish to
/// * `routing_key` - Routing key, usually `prefix.entity`
/// * `value` - Payload to encode
///
/// # Returns
/// `Ok(())` once the publish was accepted by the publisher, or the encode or publish
/// error. Publish errors carry the attempted message for retry.
pub async fn publish_with<P, C, T>(
    publisher: &P,
    codec: &C,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    C: Codec,
    T: Serialize + ?Sized,
{
    let payload = codec.encode(value)?;
    publisher
        .publish(PublishMessage::new(
            exchange,
            routing_key,
            codec.content_type(),
            payload,
        ))
        .await
}

/// Publishes `value` encoded as JSON.
pub async fn publish_json<P, T>(
    publisher: &P,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    publish_with(publisher, &JsonCodec, exchange, routing_key, value).await
}

/// Publishes `value` encoded with bincode.
pub async fn publish_bincode<P, T>(
    publisher: &P,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    publish_with(publisher, &BincodeCodec, exchange, routing_key, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{BINCODE_CONTENT_TYPE, JSON_CONTENT_TYPE},
        routing::{GameLog, PlayingState, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, PAUSE_KEY},
    };
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn json_publish_tags_content_type() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|msg| {
                msg.exchange == EXCHANGE_PERIL_DIRECT
                    && msg.routing_key == PAUSE_KEY
                    && msg.content_type == JSON_CONTENT_TYPE
                    && msg.payload == br#"{"is_paused":true}"#
            })
            .times(1)
            .returning(|_| Ok(()));

        publish_json(
            &publisher,
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused: true },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn bincode_publish_decodes_back() {
        let log = GameLog {
            current_time: Utc::now(),
            message: "spam".to_owned(),
            username: "alice".to_owned(),
        };
        let expected = log.clone();

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(move |msg| {
                msg.content_type == BINCODE_CONTENT_TYPE
                    && BincodeCodec.decode::<GameLog>(&msg.payload).ok() == Some(expected.clone())
            })
            .times(1)
            .returning(|_| Ok(()));

        publish_bincode(&publisher, EXCHANGE_PERIL_TOPIC, "game_logs.alice", &log)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn encode_failure_never_reaches_the_broker() {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();

        let mut value = HashMap::new();
        value.insert((1u8, 1u8), 1u8);

        let err = publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "war.alice", &value)
            .await
            .unwrap_err();
        assert!(matches!(err, AmqpError::EncodeError(_)));
    }

    #[tokio::test]
    async fn publish_failure_returns_attempted_message() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .returning(|msg| Err(AmqpError::PublishingError(Box::new(msg))));

        let err = publish_json(
            &publisher,
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused: false },
        )
        .await
        .unwrap_err();

        let attempted = err.failed_message().unwrap();
        assert_eq!(attempted.routing_key, PAUSE_KEY);
        assert_eq!(attempted.payload, br#"{"is_paused":false}"#);
    }
}
