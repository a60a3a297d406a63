//! Process exit codes, the tool's externally observable contract

use crate::error::{ProbeError, ProbeResult};
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Serving = 0,
    /// Invalid arguments were specified
    InvalidArguments = 1,
    /// Connection failed
    ConnectionFailure = 2,
    /// The health RPC failed
    RpcFailure = 3,
    /// The RPC succeeded but the service is not serving
    Unhealthy = 4,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<&ProbeError> for ExitStatus {
    fn from(err: &ProbeError) -> Self {
        match err {
            ProbeError::Validation(_) => ExitStatus::InvalidArguments,
            ProbeError::Connection(_) => ExitStatus::ConnectionFailure,
            ProbeError::Rpc(_) => ExitStatus::RpcFailure,
            ProbeError::Unhealthy(_) => ExitStatus::Unhealthy,
        }
    }
}

impl From<&ProbeResult> for ExitStatus {
    fn from(result: &ProbeResult) -> Self {
        match result {
            Ok(()) => ExitStatus::Serving,
            Err(err) => ExitStatus::from(err),
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
