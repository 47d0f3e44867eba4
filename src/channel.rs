// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! One `BrokerConnection` is shared by the whole process. Every publisher and
//! subscriber asks it for its own channel so that a failing operation on one channel
//! never blocks unrelated traffic. Closing the connection closes every channel and
//! ends every delivery stream.

use crate::{config::RabbitMQConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::{future::Future, sync::Arc};
use tracing::{debug, error};

pub(crate) const AMQP_REPLY_SUCCESS: u16 = 200;

/// Process-wide connection to the broker.
pub struct BrokerConnection {
    inner: Connection,
}

impl BrokerConnection {
    /// Dials the broker described by `cfg`, naming the connection after `app_name`.
    pub async fn connect(cfg: &RabbitMQConfigs, app_name: &str) -> Result<Self, AmqpError> {
        debug!(host = %cfg.host, port = cfg.port, "creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(app_name.to_owned()));

        match Connection::connect(&cfg.connection_uri(), options).await {
            Ok(inner) => {
                debug!("amqp connected");
                Ok(BrokerConnection { inner })
            }
            Err(err) => {
                error!(error = err.to_string(), host = %cfg.host, "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }

    /// Opens a new channel owned exclusively by the caller.
    pub async fn open_channel(&self) -> Result<Channel, AmqpError> {
        match self.inner.create_channel().await {
            Ok(channel) => {
                debug!(channel = channel.id(), "channel created");
                Ok(channel)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    /// Closes the connection. Failures are logged, the connection is unusable either way.
    pub async fn close(&self) {
        debug!("closing amqp connection...");
        if let Err(err) = self.inner.close(AMQP_REPLY_SUCCESS, "shutdown").await {
            error!(error = err.to_string(), "error closing the connection");
        }
    }
}

/// Connects, runs `body` with the connection and always closes it afterwards.
pub async fn with_connection<F, Fut, R>(
    cfg: &RabbitMQConfigs,
    app_name: &str,
    body: F,
) -> Result<R, AmqpError>
where
    F: FnOnce(Arc<BrokerConnection>) -> Fut,
    Fut: Future<Output = R>,
{
    let conn = Arc::new(BrokerConnection::connect(cfg, app_name).await?);
    let out = body(conn.clone()).await;
    conn.close().await;
    Ok(out)
}
