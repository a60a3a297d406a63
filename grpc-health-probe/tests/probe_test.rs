//! End-to-end probes against in-process gRPC servers
//!
//! Every test binds its own server on an ephemeral loopback port.

use clap::Parser;
use futures::Stream;
use grpc_health_probe::{run, ExitStatus, ProbeArgs, ProbeError, ProbeResult, RpcFailureKind};
use grpc_tls::cert_generation::{generate_dev_certificates, CertificatePaths};
use std::fs;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::transport::server::Router;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_server::{Health, HealthServer};
use tonic_health::pb::{HealthCheckRequest, HealthCheckResponse};

/// Health service with a fixed answer, an optional delay and a record of
/// the metadata of every call
#[derive(Clone)]
struct ScriptedHealth {
    status: ServingStatus,
    delay: Duration,
    seen: Arc<Mutex<Vec<MetadataMap>>>,
}

impl ScriptedHealth {
    fn new(status: ServingStatus) -> Self {
        Self {
            status,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[tonic::async_trait]
impl Health for ScriptedHealth {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.seen.lock().unwrap().push(request.metadata().clone());
        tokio::time::sleep(self.delay).await;

        Ok(Response::new(HealthCheckResponse {
            status: self.status as i32,
        }))
    }

    type WatchStream =
        Pin<Box<dyn Stream<Item = Result<HealthCheckResponse, Status>> + Send + 'static>>;

    async fn watch(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("watch is not used by the probe"))
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(router.serve_with_incoming(TcpListenerStream::new(listener)));
    addr
}

async fn probe(argv: &[&str]) -> ProbeResult {
    let mut full = vec!["grpc_health_probe"];
    full.extend_from_slice(argv);
    let config = ProbeArgs::try_parse_from(full).unwrap().validate()?;
    run(&config).await
}

fn exit_code(result: &ProbeResult) -> u8 {
    ExitStatus::from(result).code()
}

#[tokio::test]
async fn test_serving_server_exits_zero() {
    let (_reporter, health) = tonic_health::server::health_reporter();
    let addr = serve(Server::builder().add_service(health)).await;

    let result = probe(&[&addr.to_string()]).await;
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(exit_code(&result), 0);
}

#[tokio::test]
async fn test_not_serving_service_exits_four() {
    let (mut reporter, health) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("orders", tonic_health::ServingStatus::NotServing)
        .await;
    let addr = serve(Server::builder().add_service(health)).await;

    let result = probe(&[&addr.to_string(), "--service", "orders"]).await;
    assert!(matches!(result, Err(ProbeError::Unhealthy(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 4);
}

#[tokio::test]
async fn test_service_unknown_status_exits_four() {
    let health = ScriptedHealth::new(ServingStatus::ServiceUnknown);
    let addr = serve(Server::builder().add_service(HealthServer::new(health))).await;

    let result = probe(&[&addr.to_string()]).await;
    assert_eq!(exit_code(&result), 4);
}

#[tokio::test]
async fn test_unregistered_service_is_rpc_failure() {
    let (_reporter, health) = tonic_health::server::health_reporter();
    let addr = serve(Server::builder().add_service(health)).await;

    // The reporter answers NOT_FOUND for services it has never seen
    let result = probe(&[&addr.to_string(), "--service", "missing"]).await;
    match &result {
        Err(ProbeError::Rpc(failure)) => assert_eq!(failure.code, tonic::Code::NotFound),
        other => panic!("expected rpc failure, got {:?}", other),
    }
    assert_eq!(exit_code(&result), 3);
}

#[tokio::test]
async fn test_server_without_health_service_is_unimplemented() {
    let router = Server::builder().add_optional_service(None::<HealthServer<ScriptedHealth>>);
    let addr = serve(router).await;

    let result = probe(&[&addr.to_string()]).await;
    match &result {
        Err(ProbeError::Rpc(failure)) => assert_eq!(failure.kind(), RpcFailureKind::Unimplemented),
        other => panic!("expected unimplemented, got {:?}", other),
    }
    assert_eq!(exit_code(&result), 3);
}

#[tokio::test]
async fn test_slow_server_hits_rpc_deadline() {
    let health = ScriptedHealth::new(ServingStatus::Serving).with_delay(Duration::from_secs(3));
    let addr = serve(Server::builder().add_service(HealthServer::new(health))).await;

    let started = std::time::Instant::now();
    let result = probe(&[&addr.to_string(), "--rpc-timeout", "1"]).await;

    match &result {
        Err(ProbeError::Rpc(failure)) => {
            assert_eq!(failure.kind(), RpcFailureKind::DeadlineExceeded)
        }
        other => panic!("expected deadline exceeded, got {:?}", other),
    }
    assert_eq!(exit_code(&result), 3);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_closed_port_exits_two() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = probe(&[&addr.to_string()]).await;
    assert!(matches!(result, Err(ProbeError::Connection(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 2);
}

#[tokio::test]
async fn test_tls_handshake_stall_hits_connection_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept and hold sockets open without ever answering the ClientHello
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let started = std::time::Instant::now();
    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "1",
        "--tls",
        "--tls-no-verify",
    ])
    .await;

    assert!(matches!(result, Err(ProbeError::Connection(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 2);
    assert!(started.elapsed() < Duration::from_millis(2500), "{:?}", started.elapsed());
}

#[tokio::test]
async fn test_invalid_metadata_name_is_rejected_before_dialing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    for header in ["bad name: v", "trace-bin: AAAA"] {
        let result = probe(&[&addr.to_string(), "--rpc-headers", header]).await;
        assert!(matches!(result, Err(ProbeError::Validation(_))), "{:?}", result);
        assert_eq!(exit_code(&result), 1);
    }
}

#[tokio::test]
async fn test_invalid_arguments_exit_one() {
    let result = probe(&["127.0.0.1:1", "--rpc-timeout", "0"]).await;
    assert_eq!(exit_code(&result), 1);

    let result = probe(&["127.0.0.1:1", "--tls-no-verify"]).await;
    assert_eq!(exit_code(&result), 1);

    // Missing port is only detected when the address is split
    let result = probe(&["127.0.0.1"]).await;
    assert!(matches!(result, Err(ProbeError::Validation(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 1);
}

#[tokio::test]
async fn test_headers_and_user_agent_reach_server() {
    let health = ScriptedHealth::new(ServingStatus::Serving);
    let seen = health.seen.clone();
    let addr = serve(Server::builder().add_service(HealthServer::new(health))).await;

    let result = probe(&[
        &addr.to_string(),
        "--rpc-header",
        "authorization: Bearer token",
        "--rpc-header",
        "x-tenant: a",
        "--rpc-header",
        "x-tenant: b",
        "--user-agent",
        "kubelet-probe/1.0",
    ])
    .await;
    assert!(result.is_ok(), "{:?}", result);

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let metadata = &calls[0];

    assert_eq!(metadata.get("authorization").unwrap(), "Bearer token");
    let tenants: Vec<_> = metadata
        .get_all("x-tenant")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(tenants, vec!["a", "b"]);

    let user_agent = metadata.get("user-agent").unwrap().to_str().unwrap();
    assert!(user_agent.starts_with("kubelet-probe/1.0"), "{}", user_agent);
}

#[tokio::test]
async fn test_gzip() {
    let (_reporter, health) = tonic_health::server::health_reporter();
    let health = health
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    let addr = serve(Server::builder().add_service(health)).await;

    let result = probe(&[&addr.to_string(), "--gzip"]).await;
    assert!(result.is_ok(), "{:?}", result);
}

fn dev_certificates() -> (TempDir, CertificatePaths) {
    let dir = TempDir::new().unwrap();
    let paths = generate_dev_certificates()
        .unwrap()
        .write_to(dir.path())
        .unwrap();
    (dir, paths)
}

async fn serve_tls(paths: &CertificatePaths, require_client_cert: bool) -> SocketAddr {
    let identity = Identity::from_pem(
        fs::read_to_string(&paths.server_cert).unwrap(),
        fs::read_to_string(&paths.server_key).unwrap(),
    );
    let mut tls = ServerTlsConfig::new().identity(identity);
    if require_client_cert {
        tls = tls.client_ca_root(Certificate::from_pem(
            fs::read_to_string(&paths.ca_cert).unwrap(),
        ));
    }

    let (_reporter, health) = tonic_health::server::health_reporter();
    let router = Server::builder().tls_config(tls).unwrap().add_service(health);
    serve(router).await
}

#[tokio::test]
async fn test_tls_with_ca_cert() {
    let (_dir, paths) = dev_certificates();
    let addr = serve_tls(&paths, false).await;

    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "5",
        "--tls",
        "--tls-ca-cert",
        paths.ca_cert.to_str().unwrap(),
    ])
    .await;
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_tls_server_name_override() {
    let (_dir, paths) = dev_certificates();
    let addr = serve_tls(&paths, false).await;
    let ca = paths.ca_cert.to_str().unwrap();

    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "5",
        "--tls",
        "--tls-ca-cert",
        ca,
        "--tls-server-name",
        "localhost",
    ])
    .await;
    assert!(result.is_ok(), "{:?}", result);

    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "5",
        "--tls",
        "--tls-ca-cert",
        ca,
        "--tls-server-name",
        "health.example.com",
    ])
    .await;
    assert!(matches!(result, Err(ProbeError::Connection(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 2);
}

#[tokio::test]
async fn test_tls_untrusted_server_fails_unless_no_verify() {
    let (_dir, paths) = dev_certificates();
    let addr = serve_tls(&paths, false).await;

    // Platform roots do not include the throwaway CA
    let result = probe(&[&addr.to_string(), "--connection-timeout", "5", "--tls"]).await;
    assert_eq!(exit_code(&result), 2);

    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "5",
        "--tls",
        "--tls-no-verify",
    ])
    .await;
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_mutual_tls() {
    let (_dir, paths) = dev_certificates();
    let addr = serve_tls(&paths, true).await;

    let result = probe(&[
        &addr.to_string(),
        "--connection-timeout",
        "5",
        "--tls",
        "--tls-ca-cert",
        paths.ca_cert.to_str().unwrap(),
        "--tls-client-cert",
        paths.client_cert.to_str().unwrap(),
        "--tls-client-key",
        paths.client_key.to_str().unwrap(),
    ])
    .await;
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_missing_ca_file_is_connection_failure() {
    let (dir, _paths) = dev_certificates();
    let missing = dir.path().join("does-not-exist.crt");

    let result = probe(&[
        "127.0.0.1:1",
        "--tls",
        "--tls-ca-cert",
        missing.to_str().unwrap(),
    ])
    .await;
    assert!(matches!(result, Err(ProbeError::Connection(_))), "{:?}", result);
    assert_eq!(exit_code(&result), 2);
}

#[tokio::test]
async fn test_tls_against_plaintext_server_fails() {
    let (_reporter, health) = tonic_health::server::health_reporter();
    let addr = serve(Server::builder().add_service(health)).await;

    let result = probe(&[&addr.to_string(), "--tls", "--tls-no-verify"]).await;
    assert_eq!(exit_code(&result), 2);
}
