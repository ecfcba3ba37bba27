//! Decentralized identifier registration, resolution, and key rotation
//! across a two-node continuity chain.

mod common;

use common::keys::generate_keypair;
use common::{base_url, init_tracing_subscriber, spawn_app, spawn_db, test_config};
use reqwest::StatusCode;

#[tokio::test]
async fn register_then_resolve_round_trips() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let keypair = generate_keypair();

    let register = client
        .post(format!("{base}/pohw/did/register"))
        .json(&serde_json::json!({ "publicKeyPem": keypair.public_key_pem }))
        .send()
        .await?;
    assert_eq!(register.status(), StatusCode::CREATED);
    let identity: serde_json::Value = register.json().await?;
    let did = identity["did"].as_str().unwrap().to_owned();
    assert!(did.starts_with("did:pohw:"));
    assert_eq!(identity["status"], serde_json::json!("active"));

    let resolved = client.get(format!("{base}/pohw/did/{did}")).send().await?;
    assert_eq!(resolved.status(), StatusCode::OK);
    let resolved: serde_json::Value = resolved.json().await?;
    assert_eq!(resolved["did"], serde_json::json!(did));

    let chain = client.get(format!("{base}/pohw/did/{did}/continuity")).send().await?;
    assert_eq!(chain.status(), StatusCode::OK);
    let chain: serde_json::Value = chain.json().await?;
    assert_eq!(chain["chain"], serde_json::json!([did]));

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn rotation_with_bilateral_signatures_yields_two_node_chain() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let old_keypair = generate_keypair();
    let new_keypair = generate_keypair();

    let register = client
        .post(format!("{base}/pohw/did/register"))
        .json(&serde_json::json!({ "publicKeyPem": old_keypair.public_key_pem }))
        .send()
        .await?;
    let identity: serde_json::Value = register.json().await?;
    let old_did = identity["did"].as_str().unwrap().to_owned();

    let registry_timestamp = "2026-01-01T00:00:00+00:00";
    let mut message = Vec::new();
    message.extend_from_slice(old_keypair.public_key_pem.as_bytes());
    message.extend_from_slice(new_keypair.public_key_pem.as_bytes());
    message.extend_from_slice(registry_timestamp.as_bytes());
    let message_digest = {
        use sha2::{Digest, Sha256};
        Sha256::digest(&message).to_vec()
    };

    let old_key_signature = old_keypair.sign_hex(&message_digest);
    let new_key_signature = new_keypair.sign_hex(&message_digest);

    let rotate = client
        .post(format!("{base}/pohw/did/{old_did}/rotate"))
        .json(&serde_json::json!({
            "newPublicKeyPem": new_keypair.public_key_pem,
            "lastAnchor": null,
            "registryTimestamp": registry_timestamp,
            "oldKeySignature": old_key_signature,
            "newKeySignature": new_key_signature,
        }))
        .send()
        .await?;
    assert_eq!(rotate.status(), StatusCode::OK);
    let rotate_body: serde_json::Value = rotate.json().await?;
    let new_did = rotate_body["newDid"].as_str().unwrap().to_owned();
    assert_ne!(new_did, old_did);

    let chain = client.get(format!("{base}/pohw/did/{old_did}/continuity")).send().await?;
    let chain: serde_json::Value = chain.json().await?;
    assert_eq!(chain["chain"], serde_json::json!([old_did, new_did]));

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn rotation_with_mismatched_signature_is_rejected() -> anyhow::Result<()> {
    init_tracing_subscriber();

    let (_db, db_url) = spawn_db().await?;
    let config = test_config(&db_url, "did:pohw:registry-under-test");
    let (_app, handle, addr, _shutdown) = spawn_app(config).await?;
    let base = base_url(addr);

    let client = reqwest::Client::new();
    let old_keypair = generate_keypair();
    let new_keypair = generate_keypair();
    let wrong_keypair = generate_keypair();

    let register = client
        .post(format!("{base}/pohw/did/register"))
        .json(&serde_json::json!({ "publicKeyPem": old_keypair.public_key_pem }))
        .send()
        .await?;
    let identity: serde_json::Value = register.json().await?;
    let old_did = identity["did"].as_str().unwrap().to_owned();

    let registry_timestamp = "2026-01-01T00:00:00+00:00";
    let mut message = Vec::new();
    message.extend_from_slice(old_keypair.public_key_pem.as_bytes());
    message.extend_from_slice(new_keypair.public_key_pem.as_bytes());
    message.extend_from_slice(registry_timestamp.as_bytes());
    let message_digest = {
        use sha2::{Digest, Sha256};
        Sha256::digest(&message).to_vec()
    };

    // Signed with an unrelated key instead of the old identity's own key.
    let bogus_signature = wrong_keypair.sign_hex(&message_digest);
    let new_key_signature = new_keypair.sign_hex(&message_digest);

    let rotate = client
        .post(format!("{base}/pohw/did/{old_did}/rotate"))
        .json(&serde_json::json!({
            "newPublicKeyPem": new_keypair.public_key_pem,
            "lastAnchor": null,
            "registryTimestamp": registry_timestamp,
            "oldKeySignature": bogus_signature,
            "newKeySignature": new_key_signature,
        }))
        .send()
        .await?;
    assert_eq!(rotate.status(), StatusCode::BAD_REQUEST);

    handle.abort();
    Ok(())
}
