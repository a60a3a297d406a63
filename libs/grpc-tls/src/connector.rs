//! TCP + TLS connector for `tonic::transport::Endpoint::connect_with_connector`
//!
//! tonic's built-in TLS cannot disable verification or trust an explicit root
//! set alongside a custom server name for SNI, so TLS channels dial through
//! this connector instead and the endpoint itself stays `http://`.

use crate::error::{TlsError, TlsResult};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tonic::transport::Uri;
use tower::Service;
use tracing::debug;

/// Default port when the endpoint URI carries none
const DEFAULT_TLS_PORT: u16 = 443;

/// Dials TCP and performs the TLS handshake for every connection tonic opens
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    pub fn new(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            config,
            server_name,
        }
    }

    /// Name presented for SNI and checked against the server certificate
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    async fn connect(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        uri: Uri,
    ) -> TlsResult<TokioIo<TlsStream<TcpStream>>> {
        let host = uri.host().unwrap_or_default();
        let port = uri.port_u16().unwrap_or(DEFAULT_TLS_PORT);
        let authority = format!("{}:{}", host, port);

        let handshake_error = |source: std::io::Error| TlsError::HandshakeError {
            authority: authority.clone(),
            source,
        };

        let tcp = TcpStream::connect(authority.as_str())
            .await
            .map_err(handshake_error)?;
        tcp.set_nodelay(true).map_err(handshake_error)?;

        let stream = tokio_rustls::TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(handshake_error)?;

        debug!(
            authority = %authority,
            alpn = ?stream.get_ref().1.alpn_protocol().map(String::from_utf8_lossy),
            "TLS handshake complete"
        );

        Ok(TokioIo::new(stream))
    }
}

impl Service<Uri> for TlsConnector {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = TlsError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(Self::connect(
            self.config.clone(),
            self.server_name.clone(),
            uri,
        ))
    }
}
