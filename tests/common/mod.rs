#![allow(dead_code)]

pub mod keys;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use pohw_registry_node::app::App;
use pohw_registry_node::config::{
    AnchorConfig, AuthMode, BatchConfig, Config, DatabaseConfig, FederationConfig, ReputationConfig,
    ServerConfig, ServiceConfig,
};
use pohw_registry_node::database::Database;
use pohw_registry_node::shutdown::Shutdown;
use postgres_docker_utils::DockerContainerGuard;
use tokio::task::JoinHandle;

/// Spins up a throwaway Postgres container migrated for a single test.
///
/// Kept alive for as long as the returned guard is held; dropping it stops
/// and removes the container.
pub async fn spawn_db() -> anyhow::Result<(DockerContainerGuard, String)> {
    let container = postgres_docker_utils::setup().await?;
    let url = format!("postgres://postgres@localhost:{}/postgres", container.port());
    Ok((container, url))
}

/// Builds a minimal, valid [`Config`] pointed at `database_url`, with the
/// ambient background tasks effectively disabled (no anchor chains, no
/// federation peers) so tests only exercise what they explicitly wire up.
pub fn test_config(database_url: &str, node_did: &str) -> Config {
    Config {
        service: ServiceConfig {
            node_did:         node_did.to_owned(),
            shutdown_timeout: Duration::from_secs(5),
            shutdown_delay:   Duration::from_millis(0),
        },
        database: DatabaseConfig {
            database:       database_url.parse().expect("valid database url"),
            migrate:        true,
            max_connections: 5,
        },
        server: ServerConfig {
            address:               "127.0.0.1:0".parse().unwrap(),
            serve_timeout:          Duration::from_secs(5),
            auth_mode:              AuthMode::Disabled,
            basic_auth_credentials: HashMap::new(),
            authorized_keys:        HashMap::new(),
        },
        batch:       BatchConfig {
            batch_size:    2,
            batch_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        },
        anchor:      AnchorConfig::default(),
        reputation:  ReputationConfig {
            rate_limit_window:  Duration::from_secs(60),
            rate_limit_cap:     1_000,
            min_interval:       Duration::from_millis(0),
            neutral_score:      50,
            decay_rate_percent: 5,
            decay_interval:     Duration::from_secs(60),
            shards:             4,
        },
        federation:  FederationConfig::default(),
    }
}

/// Creates the `App` and binds it to a random local port, returning a handle
/// to the server task alongside the address it is listening on.
pub async fn spawn_app(config: Config) -> anyhow::Result<(Arc<App>, JoinHandle<()>, SocketAddr, Shutdown)> {
    let database = Arc::new(Database::new(&config.database).await?);
    let app = App::new(database, config.clone());
    let shutdown = Shutdown::spawn(config.service.shutdown_timeout, config.service.shutdown_delay);

    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let local_addr = listener.local_addr()?;

    let server_app = app.clone();
    let server_shutdown = shutdown.clone();
    let serve_timeout = config.server.serve_timeout;
    let handle = tokio::spawn(async move {
        pohw_registry_node::server::bind_from_listener(server_app, serve_timeout, listener, server_shutdown)
            .await
            .expect("server failed to bind");
    });

    Ok((app, handle, local_addr, shutdown))
}

pub fn base_url(addr: SocketAddr) -> String {
    let host = match addr.ip() {
        std::net::IpAddr::V4(ip) if ip.is_unspecified() => Ipv4Addr::LOCALHOST.to_string(),
        ip => ip.to_string(),
    };
    format!("http://{host}:{}", addr.port())
}

pub fn init_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,pohw_registry_node=debug")
        .with_test_writer()
        .try_init();
}

/// A syntactically valid attestation payload: a 32-byte 0x-prefixed hash, a
/// well-formed `did:pohw:` identity, and an opaque signature (attestation
/// intake does not verify it against the identity's stored key).
pub fn sample_attest_body(hash_suffix: &str, did: &str) -> serde_json::Value {
    serde_json::json!({
        "hash": format!("0x{:0>64}", hash_suffix),
        "signature": "deadbeef",
        "identity": did,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}
