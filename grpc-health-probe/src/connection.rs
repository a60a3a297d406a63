//! Connection establishment and lifecycle
//!
//! A [`Connection`] owns the only channel of a probe run. It is released by
//! [`Connection::close`] on the normal path and by `Drop` on every other one,
//! and never twice.

use crate::config::Target;
use crate::error::{error_chain, ProbeError};
use grpc_tls::TlsDescriptor;
use std::time::Duration;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// How the channel is secured
#[derive(Debug)]
pub enum TransportSecurity {
    Plaintext,
    Tls(TlsDescriptor),
}

impl TransportSecurity {
    pub fn is_tls(&self) -> bool {
        matches!(self, TransportSecurity::Tls(_))
    }
}

/// An established transport channel to the probed server
#[derive(Debug)]
pub struct Connection {
    channel: Option<Channel>,
    target: Target,
}

impl Connection {
    /// Dial `target` and complete the HTTP/2 (and TLS) handshake
    ///
    /// The whole establishment, including DNS and the TLS handshake, is
    /// bounded by `connect_timeout`, which also serves as the HTTP/2
    /// keepalive interval and timeout. No retries.
    pub async fn open(
        target: &Target,
        security: &TransportSecurity,
        user_agent: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let mut endpoint = Endpoint::from_shared(target.endpoint_uri())
            .map_err(|e| {
                ProbeError::validation(format!("invalid address {}: {}", target, error_chain(&e)))
            })?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(connect_timeout)
            .keep_alive_timeout(connect_timeout)
            .tcp_nodelay(true);

        if let Some(user_agent) = user_agent {
            endpoint = endpoint.user_agent(user_agent).map_err(|e| {
                ProbeError::validation(format!("invalid user-agent {:?}: {}", user_agent, e))
            })?;
        }

        let dial = async {
            let connected = match security {
                TransportSecurity::Plaintext => endpoint.connect().await,
                TransportSecurity::Tls(descriptor) => {
                    let connector = descriptor.connector(&target.host)?;
                    endpoint.connect_with_connector(connector).await
                }
            };
            connected.map_err(|e| {
                ProbeError::connection(format!(
                    "failed to connect to service at {}: {}",
                    target,
                    error_chain(&e)
                ))
            })
        };

        let channel = timeout(connect_timeout, dial).await.map_err(|_| {
            ProbeError::connection(format!(
                "timeout: failed to connect to service at {} within {:?}",
                target, connect_timeout
            ))
        })??;

        debug!(target = %target, tls = security.is_tls(), "Channel ready");

        Ok(Self {
            channel: Some(channel),
            target: target.clone(),
        })
    }

    /// Handle for issuing calls; `None` once the connection is closed
    pub fn channel(&self) -> Option<Channel> {
        self.channel.clone()
    }

    /// Close the channel now
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            drop(channel);
            debug!(target = %self.target, "Connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}
