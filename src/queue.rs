// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builders describing the queues this layer declares and how they are bound to the
//! externally configured exchanges. Every queue is dead-lettered so that discarded or
//! expired messages are rerouted for inspection instead of being lost.

use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
};
use std::collections::BTreeMap;

/// Well-known exchange receiving every discarded or expired message
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Queue argument naming the dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument for message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument for maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";

/// Unacknowledged deliveries a durable subscription may hold at once
pub const DURABLE_PREFETCH_COUNT: u16 = 10;

/// Lifetime policy of a declared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Auto-deleted once unused and exclusive to the declaring connection.
    /// Suited to per-player queues.
    Transient,
    /// Survives broker restarts and may be shared between consumers.
    Durable,
}

impl Durability {
    /// Broker-level declare flags for this policy.
    pub fn queue_declare_options(self) -> QueueDeclareOptions {
        let transient = self == Durability::Transient;

        QueueDeclareOptions {
            passive: false,
            durable: !transient,
            exclusive: transient,
            auto_delete: transient,
            nowait: false,
        }
    }

    /// Per-consumer prefetch limit, if any. Transient queues have a single consumer
    /// and take whatever the broker sends.
    pub fn prefetch(self) -> Option<u16> {
        match self {
            Durability::Transient => None,
            Durability::Durable => Some(DURABLE_PREFETCH_COUNT),
        }
    }
}

/// Definition of a queue and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durability: Durability,
    pub(crate) dead_letter_exchange: String,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
}

impl QueueDefinition {
    /// Creates a definition dead-lettered to [`DEAD_LETTER_EXCHANGE`].
    pub fn new(name: &str, durability: Durability) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durability,
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_owned(),
            ttl: None,
            max_length: None,
        }
    }

    /// Routes rejected and expired messages to `exchange` instead of the default.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = exchange.to_owned();
        self
    }

    /// Expires messages after `ttl` milliseconds; expired messages are dead-lettered.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Caps the number of ready messages; overflow is dead-lettered.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        self.durability.queue_declare_options()
    }

    /// Declare arguments. Deterministic for a given definition, so redeclaring never
    /// conflicts with the queue a previous declaration created.
    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.clone())),
        );

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        FieldTable::from(args)
    }
}

/// Binding of a queue to an exchange under a routing key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_queues_are_exclusive_and_auto_deleted() {
        let opts = Durability::Transient.queue_declare_options();

        assert!(opts.exclusive);
        assert!(opts.auto_delete);
        assert!(!opts.durable);
        assert!(!opts.passive);
    }

    #[test]
    fn durable_queues_are_shared_and_kept() {
        let opts = Durability::Durable.queue_declare_options();

        assert!(opts.durable);
        assert!(!opts.exclusive);
        assert!(!opts.auto_delete);
    }

    #[test]
    fn only_durable_queues_limit_prefetch() {
        assert_eq!(Durability::Durable.prefetch(), Some(10));
        assert_eq!(Durability::Transient.prefetch(), None);
    }

    #[test]
    fn every_queue_is_dead_lettered() {
        let def = QueueDefinition::new("pause.alice", Durability::Transient);
        let args = def.arguments();

        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(DEAD_LETTER_EXCHANGE)))
        );
        assert_eq!(args.inner().len(), 1);
    }

    #[test]
    fn redeclaring_produces_identical_arguments() {
        let def = QueueDefinition::new("war", Durability::Durable)
            .ttl(60_000)
            .max_length(1_000);

        assert_eq!(def.arguments(), def.clone().arguments());
        assert_eq!(def.declare_options(), def.declare_options());
        assert_eq!(def.arguments().inner().len(), 3);
    }

    #[test]
    fn dead_letter_exchange_can_be_overridden() {
        let def = QueueDefinition::new("game_logs", Durability::Durable)
            .dead_letter_exchange("audit_dlx");

        assert_eq!(
            def.arguments().inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from("audit_dlx")))
        );
    }

    #[test]
    fn binding_builder_sets_every_part() {
        let binding = QueueBinding::new("war")
            .exchange("peril_topic")
            .routing_key("war.*");

        assert_eq!(binding.queue_name, "war");
        assert_eq!(binding.exchange_name, "peril_topic");
        assert_eq!(binding.routing_key, "war.*");
    }
}
