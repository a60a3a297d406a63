//! The `grpc.health.v1.Health/Check` call

use crate::connection::Connection;
use crate::error::{ProbeError, ProbeResult, RpcFailure, RpcFailureKind};
use crate::status::HealthStatus;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::Request;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{debug, error, info};

/// Upper bound on a decoded response message. A `HealthCheckResponse` is a
/// couple of bytes, so this caps what a compressed response may inflate to.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024;

/// Per-call settings for the health check
#[derive(Debug, Clone)]
pub struct CheckOptions<'a> {
    /// Service to check; empty means overall server health
    pub service: &'a str,
    /// Custom headers, already converted to call metadata
    pub metadata: &'a MetadataMap,
    pub rpc_timeout: Duration,
    pub gzip: bool,
}

/// Issue one health check over `connection` and classify the answer
///
/// Only SERVING is success. The deadline is sent as `grpc-timeout` and also
/// enforced locally, so a stalled server always yields DEADLINE_EXCEEDED.
pub async fn check_health(connection: &Connection, options: &CheckOptions<'_>) -> ProbeResult {
    let channel = connection
        .channel()
        .ok_or_else(|| ProbeError::connection("connection already closed"))?;

    let mut client = HealthClient::new(channel).max_decoding_message_size(MAX_RESPONSE_BYTES);
    if options.gzip {
        client = client
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
    }

    let mut request = Request::new(HealthCheckRequest {
        service: options.service.to_string(),
    });
    *request.metadata_mut() = options.metadata.clone();
    request.set_timeout(options.rpc_timeout);

    let started = Instant::now();
    let outcome = timeout(options.rpc_timeout, client.check(request)).await;
    let elapsed = started.elapsed();

    let response = match outcome {
        Ok(Ok(response)) => response.into_inner(),
        Ok(Err(status)) => {
            let failure = RpcFailure::from_status(&status, elapsed >= options.rpc_timeout);
            return Err(report_failure(failure, options.rpc_timeout));
        }
        Err(_) => {
            return Err(report_failure(
                RpcFailure::deadline_exceeded(options.rpc_timeout),
                options.rpc_timeout,
            ))
        }
    };

    debug!(elapsed = ?elapsed, "rpc complete");

    let status = HealthStatus::from(response.status);
    if !status.is_serving() {
        info!("service unhealthy (responded with {})", status);
        return Err(ProbeError::Unhealthy(status));
    }

    info!("status: {}", status);
    Ok(())
}

fn report_failure(failure: RpcFailure, rpc_timeout: Duration) -> ProbeError {
    match failure.kind() {
        RpcFailureKind::Unimplemented => {
            error!("this server does not implement the grpc health protocol (grpc.health.v1.Health)")
        }
        RpcFailureKind::DeadlineExceeded => {
            error!("timeout: health rpc did not complete within {:?}", rpc_timeout)
        }
        RpcFailureKind::Other => {}
    }

    error!(code = ?failure.code, message = %failure.message, "health rpc failed");
    ProbeError::Rpc(failure)
}
