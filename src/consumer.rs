// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! The per-subscription delivery loop. Every delivery pulled from the stream is
//! settled exactly once: decoded and handed to the handler, or discarded when it
//! cannot be decoded, then acked or nacked according to the resulting [`AckType`].
//! Per-message failures are logged and never end the loop; only the end of the
//! stream does.

use crate::{
    codec::Codec,
    dispatcher::{AckType, Handler},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    types::FieldTable,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, fmt::Display};
use tracing::{debug, error, warn};

/// One inbound message and the means to settle it on the broker.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn delivery_tag(&self) -> u64;
    fn payload(&self) -> &[u8];
    fn headers(&self) -> Option<&FieldTable>;
    async fn ack(&self) -> Result<(), AmqpError>;
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn headers(&self) -> Option<&FieldTable> {
        self.properties.headers().as_ref()
    }

    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError(self.delivery_tag)
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), requeue, "error whiling nack msg");
                AmqpError::NackMessageError(self.delivery_tag)
            })
    }
}

/// Applies `outcome` to `delivery` with exactly one broker call.
pub(crate) async fn settle<D>(delivery: &D, outcome: AckType) -> Result<(), AmqpError>
where
    D: InboundDelivery + ?Sized,
{
    match outcome.nack_requeue() {
        None => delivery.ack().await,
        Some(requeue) => delivery.nack(requeue).await,
    }
}

/// Decodes, handles and settles one delivery. Returns the outcome that was applied.
pub(crate) async fn consume<T, D, C, H>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: &D,
    codec: &C,
    handler: &H,
) -> Result<AckType, AmqpError>
where
    T: DeserializeOwned + Send,
    D: InboundDelivery + ?Sized,
    C: Codec,
    H: Handler<T>,
{
    let delivery_tag = delivery.delivery_tag();
    let mut span = otel::consumer_span(delivery.headers(), tracer, queue);

    let outcome = match codec.decode::<T>(delivery.payload()) {
        Ok(msg) => handler.handle(msg).await,
        Err(err) => {
            warn!(
                error = err.to_string(),
                queue,
                delivery_tag,
                "discarding message that cannot be decoded"
            );
            span.record_error(&err);
            AckType::NackDiscard
        }
    };

    debug!(queue, delivery_tag, outcome = ?outcome, "settling message");
    let settled = settle(delivery, outcome).await;

    match (&settled, outcome) {
        (Err(err), _) => {
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });
        }
        (Ok(_), AckType::Ack) => span.set_status(Status::Ok),
        (Ok(_), AckType::NackRequeue) => span.set_status(Status::Error {
            description: Cow::from("msg requeued"),
        }),
        (Ok(_), AckType::NackDiscard) => span.set_status(Status::Error {
            description: Cow::from("msg discarded"),
        }),
    }
    span.end();

    settled.map(|_| outcome)
}

/// Runs the delivery loop until `stream` ends. Deliveries are handled one at a time
/// in stream order.
pub(crate) async fn consume_stream<T, S, D, E, C, H>(stream: S, queue: &str, codec: &C, handler: &H)
where
    T: DeserializeOwned + Send,
    S: Stream<Item = Result<D, E>>,
    D: InboundDelivery,
    E: Display,
    C: Codec,
    H: Handler<T>,
{
    let tracer = global::tracer("peril consumer");
    let mut stream = Box::pin(stream);

    while let Some(result) = stream.next().await {
        match result {
            Ok(delivery) => {
                if let Err(err) = consume(&tracer, queue, &delivery, codec, handler).await {
                    error!(error = err.to_string(), queue, "error consume msg");
                }
            }
            Err(err) => error!(error = %err, queue, "errors consume msg"),
        }
    }

    debug!(queue, "delivery stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{BincodeCodec, JsonCodec},
        routing::{GameLog, PlayingState},
    };
    use chrono::Utc;
    use futures_util::stream;
    use serde::{Deserialize, Serialize};
    use std::{
        collections::VecDeque,
        convert::Infallible,
        sync::{Arc, Mutex},
    };

    type Settlements = Arc<Mutex<Vec<(u64, AckType)>>>;
    type BrokerQueue = Arc<Mutex<VecDeque<FakeDelivery>>>;

    #[derive(Clone)]
    struct FakeDelivery {
        tag: u64,
        data: Vec<u8>,
        settlements: Settlements,
        broker: Option<BrokerQueue>,
        fail_settle: bool,
    }

    impl FakeDelivery {
        fn new(tag: u64, data: Vec<u8>, settlements: &Settlements) -> Self {
            FakeDelivery {
                tag,
                data,
                settlements: settlements.clone(),
                broker: None,
                fail_settle: false,
            }
        }

        fn record(&self, outcome: AckType) {
            self.settlements.lock().unwrap().push((self.tag, outcome));
        }
    }

    #[async_trait]
    impl InboundDelivery for FakeDelivery {
        fn delivery_tag(&self) -> u64 {
            self.tag
        }

        fn payload(&self) -> &[u8] {
            &self.data
        }

        fn headers(&self) -> Option<&FieldTable> {
            None
        }

        async fn ack(&self) -> Result<(), AmqpError> {
            self.record(AckType::Ack);
            if self.fail_settle {
                return Err(AmqpError::AckMessageError(self.tag));
            }
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
            if requeue {
                self.record(AckType::NackRequeue);
                if let Some(broker) = &self.broker {
                    let mut redelivery = self.clone();
                    redelivery.tag += 100;
                    broker.lock().unwrap().push_back(redelivery);
                }
            } else {
                self.record(AckType::NackDiscard);
            }
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        seq: u32,
        outcome: i64,
    }

    fn order(seq: u32, outcome: i64) -> Vec<u8> {
        serde_json::to_vec(&Order { seq, outcome }).unwrap()
    }

    fn ok_stream(
        deliveries: Vec<FakeDelivery>,
    ) -> impl Stream<Item = Result<FakeDelivery, Infallible>> {
        stream::iter(deliveries.into_iter().map(Ok))
    }

    fn recording_handler(
        seen: &Arc<Mutex<Vec<u32>>>,
    ) -> impl Fn(Order) -> futures_util::future::Ready<AckType> + Send + Sync + 'static {
        let seen = seen.clone();
        move |order: Order| {
            seen.lock().unwrap().push(order.seq);
            futures_util::future::ready(AckType::from(order.outcome))
        }
    }

    #[tokio::test]
    async fn every_delivery_is_settled_exactly_once() {
        let settlements = Settlements::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let deliveries = vec![
            FakeDelivery::new(1, order(1, 0), &settlements),
            FakeDelivery::new(2, order(2, 1), &settlements),
            FakeDelivery::new(3, order(3, 2), &settlements),
            FakeDelivery::new(4, b"not json".to_vec(), &settlements),
            FakeDelivery::new(5, order(5, 99), &settlements),
        ];

        consume_stream::<Order, _, _, _, _, _>(
            ok_stream(deliveries),
            "orders",
            &JsonCodec,
            &recording_handler(&seen),
        )
        .await;

        assert_eq!(
            *settlements.lock().unwrap(),
            vec![
                (1, AckType::Ack),
                (2, AckType::NackRequeue),
                (3, AckType::NackDiscard),
                (4, AckType::NackDiscard),
                (5, AckType::NackDiscard),
            ]
        );
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn deliveries_are_handled_in_stream_order() {
        let settlements = Settlements::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let deliveries = (1..=3)
            .map(|seq| FakeDelivery::new(seq as u64, order(seq, 0), &settlements))
            .collect();

        consume_stream::<Order, _, _, _, _, _>(
            ok_stream(deliveries),
            "orders",
            &JsonCodec,
            &recording_handler(&seen),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn wrong_encoding_is_discarded_without_stalling_the_loop() {
        let settlements = Settlements::default();
        let handled = Arc::new(Mutex::new(Vec::new()));

        let json = JsonCodec.encode(&PlayingState { is_paused: true }).unwrap();
        let binary = BincodeCodec.encode(&PlayingState { is_paused: false }).unwrap();

        let handler = {
            let handled = handled.clone();
            move |state: PlayingState| {
                handled.lock().unwrap().push(state);
                futures_util::future::ready(AckType::Ack)
            }
        };

        consume_stream::<PlayingState, _, _, _, _, _>(
            ok_stream(vec![
                FakeDelivery::new(1, json, &settlements),
                FakeDelivery::new(2, binary, &settlements),
            ]),
            "pause.alice",
            &BincodeCodec,
            &handler,
        )
        .await;

        assert_eq!(
            *settlements.lock().unwrap(),
            vec![(1, AckType::NackDiscard), (2, AckType::Ack)]
        );
        assert_eq!(*handled.lock().unwrap(), vec![PlayingState { is_paused: false }]);
    }

    #[tokio::test]
    async fn requeued_message_is_redelivered() {
        let settlements = Settlements::default();
        let broker = BrokerQueue::default();
        let log = GameLog {
            current_time: Utc::now(),
            message: "alice won a war against bob".to_owned(),
            username: "alice".to_owned(),
        };

        let mut first = FakeDelivery::new(1, BincodeCodec.encode(&log).unwrap(), &settlements);
        first.broker = Some(broker.clone());
        broker.lock().unwrap().push_back(first);

        let received = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let received = received.clone();
            move |log: GameLog| {
                let mut received = received.lock().unwrap();
                received.push(log);
                let outcome = if received.len() == 1 {
                    AckType::NackRequeue
                } else {
                    AckType::Ack
                };
                futures_util::future::ready(outcome)
            }
        };

        let deliveries = stream::unfold(broker.clone(), |broker| async move {
            let next = broker.lock().unwrap().pop_front();
            next.map(|delivery| (Ok::<_, Infallible>(delivery), broker))
        });

        consume_stream::<GameLog, _, _, _, _, _>(deliveries, "war", &BincodeCodec, &handler).await;

        assert_eq!(
            *settlements.lock().unwrap(),
            vec![(1, AckType::NackRequeue), (101, AckType::Ack)]
        );
        assert_eq!(*received.lock().unwrap(), vec![log.clone(), log]);
    }

    #[tokio::test]
    async fn settle_failures_do_not_end_the_loop() {
        let settlements = Settlements::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut failing = FakeDelivery::new(1, order(1, 0), &settlements);
        failing.fail_settle = true;

        let deliveries = stream::iter(vec![
            Ok(failing),
            Err("channel hiccup"),
            Ok(FakeDelivery::new(2, order(2, 0), &settlements)),
        ]);

        consume_stream::<Order, _, _, _, _, _>(
            deliveries,
            "orders",
            &JsonCodec,
            &recording_handler(&seen),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(settlements.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn consume_reports_the_applied_outcome() {
        let settlements = Settlements::default();
        let tracer = global::tracer("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler(&seen);

        let delivery = FakeDelivery::new(7, order(7, 1), &settlements);
        let outcome = consume::<Order, _, _, _>(&tracer, "orders", &delivery, &JsonCodec, &handler)
            .await
            .unwrap();
        assert_eq!(outcome, AckType::NackRequeue);

        let mut failing = FakeDelivery::new(8, order(8, 0), &settlements);
        failing.fail_settle = true;
        let err = consume::<Order, _, _, _>(&tracer, "orders", &failing, &JsonCodec, &handler)
            .await
            .unwrap_err();
        assert_eq!(err, AmqpError::AckMessageError(8));
    }
}
