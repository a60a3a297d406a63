//! Command-line configuration and argument validation
//!
//! [`ProbeArgs`] is the raw flag set as parsed by clap. [`ProbeArgs::validate`]
//! checks flag combinations without touching the network or the filesystem
//! and yields the immutable [`ProbeConfig`] the pipeline runs on.

use crate::error::ProbeError;
use crate::headers::parse_header;
use crate::logging::LogFormat;
use clap::Parser;
use grpc_tls::ClientTlsOptions;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "grpc_health_probe";

/// Raw command-line arguments
#[derive(Debug, Clone, Parser)]
#[command(
    name = "grpc_health_probe",
    version,
    about = "Check the health of a service implementing the gRPC health checking protocol"
)]
pub struct ProbeArgs {
    /// tcp host:port to connect
    #[arg(env = "GRPC_HEALTH_PROBE_ADDRESS")]
    pub address: String,

    /// service name to check (empty checks overall server health)
    #[arg(long, default_value = "", env = "GRPC_HEALTH_PROBE_SERVICE")]
    pub service: String,

    /// user-agent header value of health check requests
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "GRPC_HEALTH_PROBE_USER_AGENT")]
    pub user_agent: String,

    /// timeout for establishing connection (seconds)
    #[arg(
        long,
        default_value_t = 1,
        allow_negative_numbers = true,
        env = "GRPC_HEALTH_PROBE_CONNECTION_TIMEOUT"
    )]
    pub connection_timeout: i64,

    /// additional RPC headers in 'name: value' format, may be repeated
    #[arg(long = "rpc-headers", visible_alias = "rpc-header", value_name = "NAME: VALUE")]
    pub rpc_headers: Vec<String>,

    /// timeout for health check rpc (seconds)
    #[arg(
        long,
        default_value_t = 1,
        allow_negative_numbers = true,
        env = "GRPC_HEALTH_PROBE_RPC_TIMEOUT"
    )]
    pub rpc_timeout: i64,

    /// use TLS (default: false, INSECURE plaintext transport)
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS")]
    pub tls: bool,

    /// (with --tls) don't verify the certificate (INSECURE) presented by the server
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS_NO_VERIFY")]
    pub tls_no_verify: bool,

    /// (with --tls, optional) file containing trusted certificates for verifying server
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS_CA_CERT")]
    pub tls_ca_cert: Option<PathBuf>,

    /// (with --tls, optional) client certificate for authenticating to the server (requires --tls-client-key)
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS_CLIENT_CERT")]
    pub tls_client_cert: Option<PathBuf>,

    /// (with --tls) client private key for authenticating to the server (requires --tls-client-cert)
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS_CLIENT_KEY")]
    pub tls_client_key: Option<PathBuf>,

    /// (with --tls) override the hostname used to verify the server certificate
    #[arg(long, env = "GRPC_HEALTH_PROBE_TLS_SERVER_NAME")]
    pub tls_server_name: Option<String>,

    /// gzip-compress the request and accept gzip-compressed responses
    #[arg(long, env = "GRPC_HEALTH_PROBE_GZIP")]
    pub gzip: bool,

    /// verbose logs
    #[arg(long, short = 'v', env = "GRPC_HEALTH_PROBE_VERBOSE")]
    pub verbose: bool,

    /// log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "GRPC_HEALTH_PROBE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl ProbeArgs {
    /// Check every flag combination rule and freeze the result
    pub fn validate(&self) -> Result<ProbeConfig, ProbeError> {
        if self.address.is_empty() {
            return Err(ProbeError::validation("address not specified"));
        }

        for header in &self.rpc_headers {
            parse_header(header)?;
        }

        if self.connection_timeout <= 0 {
            return Err(ProbeError::validation(format!(
                "--connection-timeout must be greater than zero (specified: {})",
                self.connection_timeout
            )));
        }

        if self.rpc_timeout <= 0 {
            return Err(ProbeError::validation(format!(
                "--rpc-timeout must be greater than zero (specified: {})",
                self.rpc_timeout
            )));
        }

        if !self.tls {
            let tls_only = [
                ("--tls-no-verify", self.tls_no_verify),
                ("--tls-ca-cert", self.tls_ca_cert.is_some()),
                ("--tls-client-cert", self.tls_client_cert.is_some()),
                ("--tls-server-name", self.tls_server_name.is_some()),
            ];
            if let Some((flag, _)) = tls_only.iter().find(|(_, set)| *set) {
                return Err(ProbeError::validation(format!(
                    "specified {} without specifying --tls",
                    flag
                )));
            }
        }

        match (&self.tls_client_cert, &self.tls_client_key) {
            (Some(_), None) => {
                return Err(ProbeError::validation(
                    "specified --tls-client-cert without specifying --tls-client-key",
                ))
            }
            (None, Some(_)) => {
                return Err(ProbeError::validation(
                    "specified --tls-client-key without specifying --tls-client-cert",
                ))
            }
            _ => {}
        }

        if self.tls_ca_cert.is_some() && self.tls_no_verify {
            return Err(ProbeError::validation(
                "cannot specify --tls-ca-cert with --tls-no-verify (CA cert would not be used)",
            ));
        }

        if self.tls_server_name.is_some() && self.tls_no_verify {
            return Err(ProbeError::validation(
                "cannot specify --tls-server-name with --tls-no-verify (server name would not be used)",
            ));
        }

        let tls = self.tls.then(|| ClientTlsOptions {
            ca_cert_path: self.tls_ca_cert.clone(),
            client_cert_path: self.tls_client_cert.clone(),
            client_key_path: self.tls_client_key.clone(),
            no_verify: self.tls_no_verify,
            server_name: self.tls_server_name.clone(),
        });

        Ok(ProbeConfig {
            address: self.address.clone(),
            service: self.service.clone(),
            user_agent: self.user_agent.clone(),
            rpc_headers: self.rpc_headers.clone(),
            connection_timeout: Duration::from_secs(self.connection_timeout.unsigned_abs()),
            rpc_timeout: Duration::from_secs(self.rpc_timeout.unsigned_abs()),
            tls,
            gzip: self.gzip,
        })
    }
}

/// Validated, immutable probe configuration
///
/// TLS-only settings live inside `tls`, so they cannot exist without TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    address: String,
    service: String,
    user_agent: String,
    rpc_headers: Vec<String>,
    connection_timeout: Duration,
    rpc_timeout: Duration,
    tls: Option<ClientTlsOptions>,
    gzip: bool,
}

impl ProbeConfig {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn rpc_headers(&self) -> &[String] {
        &self.rpc_headers
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// TLS inputs, `None` for plaintext
    pub fn tls_options(&self) -> Option<&ClientTlsOptions> {
        self.tls.as_ref()
    }

    pub fn gzip(&self) -> bool {
        self.gzip
    }

    /// Split the address into host and port
    pub fn target(&self) -> Result<Target, ProbeError> {
        self.address.parse()
    }
}

/// Host and port of the probed server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// `http://` URI for the tonic endpoint; TLS is layered by the connector
    pub fn endpoint_uri(&self) -> String {
        format!("http://{}", self)
    }
}

impl std::str::FromStr for Target {
    type Err = ProbeError;

    /// Accepts `host:port` and bracketed IPv6 `[addr]:port`
    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            ProbeError::validation(format!(
                "invalid address {:?}, expected host:port",
                address
            ))
        };

        let (host, port) = match address.strip_prefix('[') {
            Some(rest) => rest.split_once("]:").ok_or_else(malformed)?,
            None => {
                let (host, port) = address.rsplit_once(':').ok_or_else(malformed)?;
                if host.contains(':') {
                    return Err(malformed());
                }
                (host, port)
            }
        };

        if host.is_empty() {
            return Err(malformed());
        }

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(malformed)?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
