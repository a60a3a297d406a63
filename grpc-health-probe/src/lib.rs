//! gRPC health probe
//!
//! Connects to a server, calls `grpc.health.v1.Health/Check` once and maps
//! the outcome onto a process exit code:
//!
//! | code | meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | service is SERVING                        |
//! | 1    | invalid arguments                         |
//! | 2    | connection failed                         |
//! | 3    | health RPC failed                         |
//! | 4    | RPC succeeded but the service is unhealthy |

pub mod check;
pub mod config;
pub mod connection;
pub mod error;
pub mod exit;
pub mod headers;
pub mod logging;
pub mod status;

pub use check::{check_health, CheckOptions};
pub use config::{ProbeArgs, ProbeConfig, Target};
pub use connection::{Connection, TransportSecurity};
pub use error::{ProbeError, ProbeResult, RpcFailure, RpcFailureKind};
pub use exit::ExitStatus;
pub use headers::HeaderSet;
pub use status::HealthStatus;

use grpc_tls::TlsDescriptor;
use std::time::Instant;
use tracing::{debug, error};

/// Run one probe against an already validated configuration
pub async fn run(config: &ProbeConfig) -> ProbeResult {
    let target = config.target()?;
    let headers = HeaderSet::compose(config.rpc_headers(), config.user_agent())?;
    let metadata = headers.metadata()?;

    debug!(
        address = %target,
        service = config.service(),
        connection_timeout = ?config.connection_timeout(),
        rpc_timeout = ?config.rpc_timeout(),
        tls = config.tls_options().is_some(),
        gzip = config.gzip(),
        headers = %headers,
        "parsed options"
    );

    let security = match config.tls_options() {
        Some(options) => {
            let descriptor = TlsDescriptor::build(options).map_err(|e| {
                error!("failed to initialize tls credentials: {}", e);
                ProbeError::from(e)
            })?;
            debug!(
                verification = ?descriptor.verification(),
                client_identity = descriptor.has_client_identity(),
                server_name = descriptor.hostname_override().unwrap_or(&target.host),
                "tls credentials ready"
            );
            TransportSecurity::Tls(descriptor)
        }
        None => TransportSecurity::Plaintext,
    };

    debug!(address = %target, "establishing connection");
    let started = Instant::now();
    let connection = Connection::open(
        &target,
        &security,
        headers.user_agent(),
        config.connection_timeout(),
    )
    .await
    .map_err(|e| {
        if let ProbeError::Connection(msg) = &e {
            error!("{}", msg);
        }
        e
    })?;
    debug!(elapsed = ?started.elapsed(), "connection established");

    let options = CheckOptions {
        service: config.service(),
        metadata: &metadata,
        rpc_timeout: config.rpc_timeout(),
        gzip: config.gzip(),
    };
    let result = check_health(&connection, &options).await;

    connection.close();
    result
}
