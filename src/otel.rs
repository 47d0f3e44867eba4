// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Trace-context propagation through AMQP message headers.
//!
//! Uses whatever global propagator and tracer provider the process installed; with
//! none installed both ends are no-ops.

use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::collections::BTreeMap;
use tracing::warn;

struct HeaderInjector<'a>(&'a mut BTreeMap<ShortString, AMQPValue>);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

struct HeaderExtractor<'a>(&'a BTreeMap<ShortString, AMQPValue>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AMQPValue::LongString(value)) => std::str::from_utf8(value.as_bytes())
                .map_err(|e| warn!("error decoding header value {:?}", e))
                .ok(),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|header| header.as_str()).collect()
    }
}

/// Headers carrying the current trace context.
pub(crate) fn inject_current_context() -> FieldTable {
    let mut headers = BTreeMap::new();
    let ctx = Context::current();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector(&mut headers))
    });

    FieldTable::from(headers)
}

/// Starts a consumer span for one delivery, parented on the context found in
/// `headers`.
pub(crate) fn consumer_span(
    headers: Option<&FieldTable>,
    tracer: &BoxedTracer,
    queue: &str,
) -> BoxedSpan {
    let empty = BTreeMap::new();
    let headers = headers.map(|h| h.inner()).unwrap_or(&empty);

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(headers))
    });

    tracer
        .span_builder(format!("{queue} receive"))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx)
}
