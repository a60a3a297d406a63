//! Certificate generation for tests and local development
//!
//! Produces a throwaway CA plus a `localhost` server certificate and a client
//! certificate signed by it. **Never** point a real probe at these.

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    SanType,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use tracing::debug;

const ORGANIZATION: &str = "grpc-health-probe development";

/// PEM-encoded CA, server and client material
#[derive(Clone)]
pub struct CertificateBundle {
    pub ca_cert: String,
    pub server_cert: String,
    pub server_key: String,
    pub client_cert: String,
    pub client_key: String,
}

/// Where [`CertificateBundle::write_to`] put each file
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Generate a CA, a server certificate valid for `localhost`, `127.0.0.1`
/// and `::1`, and a client certificate, all signed by the CA
pub fn generate_dev_certificates() -> Result<CertificateBundle> {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name("grpc-health-probe test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .context("Failed to generate CA certificate")?;

    let mut server_params = CertificateParams::default();
    server_params.distinguished_name = distinguished_name("localhost");
    server_params.subject_alt_names = vec![
        SanType::DnsName(
            "localhost"
                .try_into()
                .context("Failed to create SAN for localhost")?,
        ),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];
    let (server_cert, server_key) = issue(server_params, &ca_cert, &ca_key)
        .context("Failed to sign server certificate")?;

    let mut client_params = CertificateParams::default();
    client_params.distinguished_name = distinguished_name("grpc-health-probe");
    let (client_cert, client_key) = issue(client_params, &ca_cert, &ca_key)
        .context("Failed to sign client certificate")?;

    debug!("Generated development certificates (CA, server, client)");

    Ok(CertificateBundle {
        ca_cert: ca_cert.pem(),
        server_cert,
        server_key,
        client_cert,
        client_key,
    })
}

impl CertificateBundle {
    /// Write every PEM file into `dir` (`ca.crt`, `server.crt`, `server.key`,
    /// `client.crt`, `client.key`)
    pub fn write_to(&self, dir: &Path) -> Result<CertificatePaths> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;

        let paths = CertificatePaths {
            ca_cert: dir.join("ca.crt"),
            server_cert: dir.join("server.crt"),
            server_key: dir.join("server.key"),
            client_cert: dir.join("client.crt"),
            client_key: dir.join("client.key"),
        };

        for (path, pem) in [
            (&paths.ca_cert, &self.ca_cert),
            (&paths.server_cert, &self.server_cert),
            (&paths.server_key, &self.server_key),
            (&paths.client_cert, &self.client_cert),
            (&paths.client_key, &self.client_key),
        ] {
            fs::write(path, pem).with_context(|| format!("Failed to write {:?}", path))?;
        }

        Ok(paths)
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name.push(DnType::OrganizationName, ORGANIZATION);
    name
}

fn issue(
    params: CertificateParams,
    ca_cert: &Certificate,
    ca_key: &KeyPair,
) -> Result<(String, String)> {
    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca_cert, ca_key)?;
    Ok((cert.pem(), key.serialize_pem()))
}
