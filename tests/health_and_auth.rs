//! `/health` and `/metrics` stay reachable without credentials even when
//! Basic Auth is required for every `/pohw/*` route.

mod common;

use std::collections::HashMap;

use common::{base_url, init_tracing_subscriber, spawn_app, spawn_db, test_config};
use pohw_registry_node::config::AuthMode;
use reqwest::StatusCode;

#[tokio::test]
async fn health_and_metrics_bypass_auth() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let mut config = test_config(&db_url, "did:pohw:registry-under-test");
    config.server.auth_mode = AuthMode::BasicOnly;
    config.server.basic_auth_credentials = HashMap::from([("app".to_owned(), "secret".to_owned())]);
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await?;
    assert_eq!(health.status(), StatusCode::OK);

    let metrics = client.get(format!("{base}/metrics")).send().await?;
    assert_eq!(metrics.status(), StatusCode::OK);

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_basic_auth_when_configured() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let mut config = test_config(&db_url, "did:pohw:registry-under-test");
    config.server.auth_mode = AuthMode::BasicOnly;
    config.server.basic_auth_credentials = HashMap::from([("app".to_owned(), "secret".to_owned())]);
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();

    let unauthenticated = client.get(format!("{base}/pohw/status")).send().await?;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let authenticated = client
        .get(format!("{base}/pohw/status"))
        .basic_auth("app", Some("secret"))
        .send()
        .await?;
    assert_eq!(authenticated.status(), StatusCode::OK);

    handle.abort();
    Ok(())
}
