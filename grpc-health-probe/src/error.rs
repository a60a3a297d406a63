//! Failure taxonomy for a single probe run

use crate::status::HealthStatus;
use grpc_tls::TlsError;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tonic::{Code, Status};

/// Outcome of a probe: `Ok(())` means the service answered SERVING
pub type ProbeResult = Result<(), ProbeError>;

/// Every way a probe can fail, in pipeline order
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Rejected before any I/O was attempted
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// Dial, TLS material, handshake or connection timeout failure
    #[error("connection failure: {0}")]
    Connection(String),

    /// The health RPC itself failed after the connection was established
    #[error("rpc failure: {0}")]
    Rpc(RpcFailure),

    /// The RPC succeeded but the service is not SERVING
    #[error("service unhealthy (responded with {0})")]
    Unhealthy(HealthStatus),
}

impl ProbeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

impl From<TlsError> for ProbeError {
    fn from(err: TlsError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Diagnostic class of an RPC failure; all of them share one exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFailureKind {
    /// Server does not serve `grpc.health.v1.Health`
    Unimplemented,
    /// The call did not finish within the RPC timeout
    DeadlineExceeded,
    Other,
}

/// gRPC status of a failed health call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub code: Code,
    pub message: String,
}

impl RpcFailure {
    /// Classify a status returned by the call
    ///
    /// tonic reports its own client-side timer as `Cancelled`, so a
    /// cancellation observed once the deadline has passed is a deadline.
    pub fn from_status(status: &Status, deadline_passed: bool) -> Self {
        let code = match status.code() {
            Code::Cancelled if deadline_passed => Code::DeadlineExceeded,
            code => code,
        };

        Self {
            code,
            message: status.message().to_string(),
        }
    }

    pub fn deadline_exceeded(timeout: Duration) -> Self {
        Self {
            code: Code::DeadlineExceeded,
            message: format!("health rpc did not complete within {:?}", timeout),
        }
    }

    pub fn kind(&self) -> RpcFailureKind {
        match self.code {
            Code::Unimplemented => RpcFailureKind::Unimplemented,
            Code::DeadlineExceeded => RpcFailureKind::DeadlineExceeded,
            _ => RpcFailureKind::Other,
        }
    }
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code = {:?}, message = {:?}", self.code, self.message)
    }
}

/// Render an error with its whole `source()` chain
///
/// tonic's transport errors only say "transport error" at the top level.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }

    rendered
}
