//! Attestation intake: duplicate submissions are rejected, rate limiting
//! kicks in once the configured cap is exceeded, and a successfully attested
//! proof can be looked up again through `/pohw/verify` and `/pohw/proof`.

mod common;

use common::{base_url, init_tracing_subscriber, sample_attest_body, spawn_app, spawn_db, test_config};
use reqwest::StatusCode;

#[tokio::test]
async fn duplicate_attestation_is_rejected() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let body = sample_attest_body("1", "did:pohw:attestor-one");

    let first = client.post(format!("{base}/pohw/attest")).json(&body).send().await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = client.post(format!("{base}/pohw/attest")).json(&body).send().await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn excess_attestations_are_rate_limited() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let mut config = test_config(&db_url, "did:pohw:registry-under-test");
    config.reputation.rate_limit_cap = 2;
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let did = "did:pohw:rate-limited-attestor";

    for i in 0..2 {
        let body = sample_attest_body(&i.to_string(), did);
        let response = client.post(format!("{base}/pohw/attest")).json(&body).send().await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let body = sample_attest_body("over-the-cap", did);
    let response = client.post(format!("{base}/pohw/attest")).json(&body).send().await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn attested_proof_is_verifiable() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let body = sample_attest_body("2", "did:pohw:attestor-two");

    let response = client.post(format!("{base}/pohw/attest")).json(&body).send().await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let hash = body["hash"].as_str().unwrap();
    let verify = client.get(format!("{base}/pohw/verify/{hash}")).send().await?;
    assert_eq!(verify.status(), StatusCode::OK);
    let verify_json: serde_json::Value = verify.json().await?;
    assert_eq!(verify_json["valid"], serde_json::json!(true));
    assert_eq!(verify_json["identity"], serde_json::json!("did:pohw:attestor-two"));

    let malformed = client
        .get(format!("{base}/pohw/verify/not-a-known-hash"))
        .send()
        .await?;
    assert_eq!(malformed.status(), StatusCode::NOT_FOUND);

    handle.abort();
    Ok(())
}
