// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod game;
pub mod handlers;
pub mod logging;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod topology;

pub use consumer::InboundDelivery;
