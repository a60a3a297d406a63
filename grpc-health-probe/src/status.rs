//! Serving status reported by `grpc.health.v1.Health/Check`

use std::fmt;
use tonic_health::pb::health_check_response::ServingStatus;

/// Health status as defined by the health checking protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Status could not be determined
    Unknown,
    /// Service is healthy and can accept traffic
    Serving,
    /// Service is unhealthy and should not accept traffic
    NotServing,
    /// Server does not know the requested service
    ServiceUnknown,
}

impl HealthStatus {
    pub fn is_serving(self) -> bool {
        self == HealthStatus::Serving
    }

    /// Protocol spelling, e.g. `NOT_SERVING`
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Serving => "SERVING",
            HealthStatus::NotServing => "NOT_SERVING",
            HealthStatus::ServiceUnknown => "SERVICE_UNKNOWN",
        }
    }
}

impl From<ServingStatus> for HealthStatus {
    fn from(status: ServingStatus) -> Self {
        match status {
            ServingStatus::Unknown => HealthStatus::Unknown,
            ServingStatus::Serving => HealthStatus::Serving,
            ServingStatus::NotServing => HealthStatus::NotServing,
            ServingStatus::ServiceUnknown => HealthStatus::ServiceUnknown,
        }
    }
}

/// Wire value; anything outside the enumeration decodes as UNKNOWN
impl From<i32> for HealthStatus {
    fn from(value: i32) -> Self {
        ServingStatus::try_from(value)
            .map(HealthStatus::from)
            .unwrap_or(HealthStatus::Unknown)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
