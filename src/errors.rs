// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Peril Message Layer
//!
//! `AmqpError` covers every failure the dispatch layer can surface: connectivity,
//! topology declaration, encoding, publishing and acknowledgment. Setup errors carry
//! the exchange/queue/key involved so misconfiguration can be diagnosed from the
//! message alone.

use crate::publisher::PublishMessage;
use thiserror::Error;

/// Represents errors that can occur while talking to RabbitMQ.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error loading the process configuration
    #[error("failure to load configuration: {0}")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring a queue, including conflicts with an existing queue
    #[error("failure to declare a queue `{queue}`: {reason}")]
    DeclareQueueError { queue: String, reason: String },

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}` with key `{key}`: {reason}")]
    BindingExchangeToQueueError {
        exchange: String,
        queue: String,
        key: String,
        reason: String,
    },

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos for queue `{0}`")]
    QoSDeclarationError(String),

    /// Error attaching a consumer to a queue
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// The value could not be represented in the chosen encoding
    #[error("failure to encode payload: {0}")]
    EncodeError(String),

    /// The payload could not be decoded into the expected type
    #[error("failure to decode payload: {0}")]
    DecodeError(String),

    /// The broker or channel refused the message; the attempted message is kept for retry
    #[error("failure to publish to exchange `{}` with key `{}`", .0.exchange, .0.routing_key)]
    PublishingError(Box<PublishMessage>),

    /// The broker negatively confirmed a message published in confirm mode
    #[error("publish to exchange `{}` with key `{}` was not confirmed", .0.exchange, .0.routing_key)]
    PublishNotConfirmed(Box<PublishMessage>),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`")]
    NackMessageError(u64),
}

impl AmqpError {
    /// Returns the message that failed to publish, if this is a publish error.
    pub fn failed_message(&self) -> Option<&PublishMessage> {
        match self {
            AmqpError::PublishingError(msg) | AmqpError::PublishNotConfirmed(msg) => Some(msg),
            _ => None,
        }
    }
}
