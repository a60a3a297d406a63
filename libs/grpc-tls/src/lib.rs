//! Client-side TLS credentials for gRPC probes
//!
//! Turns file-path options (CA bundle, client certificate/key, verification
//! mode, server name override) into an immutable [`TlsDescriptor`], and the
//! descriptor into a `rustls` client configuration plus a connector that
//! tonic can dial through.
//!
//! ```rust,no_run
//! use grpc_tls::{ClientTlsOptions, TlsDescriptor};
//!
//! # fn example() -> grpc_tls::TlsResult<()> {
//! let options = ClientTlsOptions {
//!     ca_cert_path: Some("/certs/ca.crt".into()),
//!     ..Default::default()
//! };
//! let descriptor = TlsDescriptor::build(&options)?;
//! let connector = descriptor.connector("health.internal")?;
//! # Ok(())
//! # }
//! ```

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(any(test, feature = "dev-certs"))]
pub mod cert_generation;
pub mod connector;
mod danger;
pub mod error;

pub use connector::TlsConnector;
pub use error::{TlsError, TlsResult};

/// ALPN protocol id for HTTP/2, required by gRPC servers
const ALPN_H2: &[u8] = b"h2";

/// File-path inputs for building client TLS credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientTlsOptions {
    /// PEM file with the certificates to trust instead of the system store
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate chain for mTLS (paired with `client_key_path`)
    pub client_cert_path: Option<PathBuf>,
    /// PEM client private key for mTLS (paired with `client_cert_path`)
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification entirely (INSECURE)
    pub no_verify: bool,
    /// Name used for SNI and certificate verification instead of the target host
    pub server_name: Option<String>,
}

/// Which certificates anchor server verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustRoots {
    /// Platform trust store, loaded when the client config is built
    System,
    /// Certificates loaded from an explicit CA file
    Certificates(Vec<CertificateDer<'static>>),
}

/// Server certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Full,
    None,
}

/// Read-only transport-security descriptor, built once per probe
#[derive(Debug)]
pub struct TlsDescriptor {
    certificate_chain: Vec<CertificateDer<'static>>,
    private_key: Option<PrivateKeyDer<'static>>,
    trust_roots: TrustRoots,
    verification: Verification,
    hostname_override: Option<String>,
}

impl TlsDescriptor {
    /// Load all referenced PEM material and assemble the descriptor
    ///
    /// The client identity is only loaded when both certificate and key paths
    /// are present. Any unreadable or malformed file fails the build.
    pub fn build(options: &ClientTlsOptions) -> TlsResult<Self> {
        let (certificate_chain, private_key) =
            match (&options.client_cert_path, &options.client_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    let chain = load_certificates(cert_path)?;
                    let key = load_private_key(key_path)?;
                    debug!(
                        client_cert = ?cert_path,
                        certificates = chain.len(),
                        "Loaded client identity for mTLS"
                    );
                    (chain, Some(key))
                }
                _ => (Vec::new(), None),
            };

        let trust_roots = match &options.ca_cert_path {
            Some(ca_path) => {
                let certs = load_certificates(ca_path)?;
                debug!(ca_cert = ?ca_path, certificates = certs.len(), "Loaded CA trust roots");
                TrustRoots::Certificates(certs)
            }
            None => TrustRoots::System,
        };

        let verification = if options.no_verify {
            warn!("Server certificate verification disabled (INSECURE)");
            Verification::None
        } else {
            Verification::Full
        };

        Ok(Self {
            certificate_chain,
            private_key,
            trust_roots,
            verification,
            hostname_override: options.server_name.clone(),
        })
    }

    pub fn certificate_chain(&self) -> &[CertificateDer<'static>] {
        &self.certificate_chain
    }

    pub fn has_client_identity(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn trust_roots(&self) -> &TrustRoots {
        &self.trust_roots
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    pub fn hostname_override(&self) -> Option<&str> {
        self.hostname_override.as_deref()
    }

    /// Build the rustls client configuration (ring provider, ALPN h2)
    pub fn client_config(&self) -> TlsResult<Arc<ClientConfig>> {
        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?;

        let builder = match self.verification {
            Verification::None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier)),
            Verification::Full => builder.with_root_certificates(self.root_store()?),
        };

        let mut config = match &self.private_key {
            Some(key) => {
                builder.with_client_auth_cert(self.certificate_chain.clone(), key.clone_key())?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Arc::new(config))
    }

    /// Build a connector for `host`, honouring the hostname override
    pub fn connector(&self, host: &str) -> TlsResult<TlsConnector> {
        let name = self.hostname_override.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name)
            .map_err(|_| TlsError::InvalidServerName {
                name: name.to_string(),
            })?
            .to_owned();

        Ok(TlsConnector::new(self.client_config()?, server_name))
    }

    fn root_store(&self) -> TlsResult<RootCertStore> {
        let mut store = RootCertStore::empty();

        match &self.trust_roots {
            TrustRoots::Certificates(certs) => {
                for cert in certs {
                    store.add(cert.clone())?;
                }
            }
            TrustRoots::System => {
                let native = rustls_native_certs::load_native_certs().map_err(|e| {
                    TlsError::TrustStoreError {
                        reason: e.to_string(),
                    }
                })?;
                let (added, ignored) = store.add_parsable_certificates(native);
                debug!(added, ignored, "Loaded system trust roots");
            }
        }

        if store.is_empty() {
            return Err(TlsError::TrustStoreError {
                reason: "no trusted certificates available".to_string(),
            });
        }

        Ok(store)
    }
}

/// Load every certificate from a PEM file; at least one is required
pub fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(TlsError::CertificateParseError {
            path: path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::CertificateParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::CertificateParseError {
            path: path.to_path_buf(),
            reason: "no private key found".to_string(),
        })
}

fn open_pem(path: &Path) -> TlsResult<BufReader<fs::File>> {
    fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| TlsError::CertificateReadError {
            path: path.to_path_buf(),
            source: e,
        })
}
