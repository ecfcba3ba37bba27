//! Batch sealing and anchoring: two attested proofs seal into one batch with
//! an inclusion proof each, and anchoring on a chain with no configured
//! broadcaster fails cleanly instead of panicking.

mod common;

use common::{base_url, init_tracing_subscriber, sample_attest_body, spawn_app, spawn_db, test_config};
use reqwest::StatusCode;

#[tokio::test]
async fn two_proofs_seal_into_one_batch_with_inclusion_proofs() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let mut config = test_config(&db_url, "did:pohw:registry-under-test");
    config.batch.batch_size = 2;
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let first_body = sample_attest_body("a1", "did:pohw:batch-attestor-one");
    let second_body = sample_attest_body("a2", "did:pohw:batch-attestor-two");

    for body in [&first_body, &second_body] {
        let response = client.post(format!("{base}/pohw/attest")).json(body).send().await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let batch_response = client.post(format!("{base}/pohw/batch/create")).send().await?;
    assert_eq!(batch_response.status(), StatusCode::OK);
    let batch: serde_json::Value = batch_response.json().await?;
    assert!(batch["root"].is_string());
    assert_eq!(batch["leafCount"], serde_json::json!(2));

    for body in [&first_body, &second_body] {
        let hash = body["hash"].as_str().unwrap();
        let proof_response = client.get(format!("{base}/pohw/proof/{hash}")).send().await?;
        assert_eq!(proof_response.status(), StatusCode::OK);
        let proof: serde_json::Value = proof_response.json().await?;
        assert_eq!(proof["root"], batch["root"]);
        assert!(proof["inclusionProof"].is_object());
    }

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn anchoring_on_unconfigured_chain_fails_cleanly() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let attest = sample_attest_body("anchor-target", "did:pohw:anchor-attestor");
    let response = client.post(format!("{base}/pohw/attest")).json(&attest).send().await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let batch_response = client.post(format!("{base}/pohw/batch/create")).send().await?;
    let batch: serde_json::Value = batch_response.json().await?;
    let batch_id = batch["id"].as_i64().unwrap();

    let anchor_response = client
        .post(format!("{base}/pohw/batch/anchor/{batch_id}"))
        .json(&serde_json::json!({ "chain": "bitcoin" }))
        .send()
        .await?;
    assert_eq!(anchor_response.status(), StatusCode::BAD_REQUEST);

    handle.abort();
    Ok(())
}
