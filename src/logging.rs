// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Tracing subscriber bootstrap.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this more than once is
/// harmless: later calls leave the installed subscriber in place.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .try_init();

    if installed.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
