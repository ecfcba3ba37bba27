pub mod error;

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use error::Error;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::app::App;
use crate::config::ServerConfig;
use crate::database::methods::DbMethods as _;
use crate::shutdown::Shutdown;

mod custom_middleware;
pub mod data;

use self::data::{
    AddPeerRequestDto, AnchorBatchRequestDto, AnchorDto, AttestRequestDto, BatchDto, ContinuityChainDto,
    CredentialDto, FederationDescriptorDto, IdentityDto, IssueCredentialRequestDto, ProofResponseDto,
    RateLimitDto, ReceiptDto, RegisterIdentityRequestDto, ReputationDto, RotateIdentityRequestDto,
    RotateIdentityResponseDto, StatusDto, SyncBatchDto, SyncProofDto, SyncStatusDto, TierDto, VerifyResponseDto,
};

async fn attest(
    State(app): State<Arc<App>>,
    Json(request): Json<AttestRequestDto>,
) -> Result<(StatusCode, Json<ReceiptDto>), Error> {
    let assistance_profile = data::parse_assistance_profile(request.assistance_profile.as_deref())?;

    let receipt = app
        .attest(crate::attestation::AttestRequest {
            artifact_hash: request.hash,
            signature: request.signature,
            identity_did: request.identity,
            client_timestamp: request.timestamp,
            process_digest: request.process_digest,
            compound_hash: request.compound_hash,
            process_metrics: request.process_metrics,
            derived_from: request.derived_from,
            assistance_profile,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn verify(
    State(app): State<Arc<App>>,
    Path(hash): Path<String>,
) -> Result<Json<VerifyResponseDto>, Error> {
    Ok(Json(app.get_claim(&hash).await?.into()))
}

async fn get_proof(
    State(app): State<Arc<App>>,
    Path(hash): Path<String>,
) -> Result<Json<ProofResponseDto>, Error> {
    Ok(Json(app.get_claim(&hash).await?.into()))
}

async fn get_claim(
    State(app): State<Arc<App>>,
    Path(hash): Path<String>,
) -> Result<Json<crate::claim::Claim>, Error> {
    Ok(Json(app.get_claim(&hash).await?))
}

async fn create_batch(State(app): State<Arc<App>>) -> Result<Json<Option<BatchDto>>, Error> {
    Ok(Json(app.seal_batch_now(true).await?.map(BatchDto::from)))
}

async fn anchor_batch(
    State(app): State<Arc<App>>,
    Path(batch_id): Path<i64>,
    Json(request): Json<AnchorBatchRequestDto>,
) -> Result<Json<AnchorDto>, Error> {
    Ok(Json(app.anchor_batch(batch_id, request.chain).await?.into()))
}

async fn batch_anchors(
    State(app): State<Arc<App>>,
    Path(batch_id): Path<i64>,
) -> Result<Json<Vec<AnchorDto>>, Error> {
    Ok(Json(app.batch_anchors(batch_id).await?.into_iter().map(AnchorDto::from).collect()))
}

async fn status(State(app): State<Arc<App>>) -> Result<Json<StatusDto>, Error> {
    Ok(Json(app.status().await?.into()))
}

async fn federation_descriptor(State(app): State<Arc<App>>) -> Result<Json<FederationDescriptorDto>, Error> {
    let latest = app.database.get_latest_batch().await?;
    Ok(Json(FederationDescriptorDto {
        registry_id: app.config.service.node_did.clone(),
        root:        latest.as_ref().map(|b| b.root.clone()),
        created:     latest.map(|b| b.sealed_at),
    }))
}

async fn register_identity(
    State(app): State<Arc<App>>,
    Json(request): Json<RegisterIdentityRequestDto>,
) -> Result<(StatusCode, Json<IdentityDto>), Error> {
    let document = app.generate_identity(&request.public_key_pem).await?;
    Ok((StatusCode::CREATED, Json(document.into())))
}

async fn resolve_identity(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
) -> Result<Json<IdentityDto>, Error> {
    Ok(Json(app.resolve_identity(&did).await?.into()))
}

async fn rotate_identity(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
    Json(request): Json<RotateIdentityRequestDto>,
) -> Result<Json<RotateIdentityResponseDto>, Error> {
    let (new_did, _edge) = app
        .rotate_identity(
            &did,
            &request.new_public_key_pem,
            request.last_anchor.as_deref(),
            &request.registry_timestamp,
            &request.old_key_signature,
            &request.new_key_signature,
        )
        .await?;
    Ok(Json(RotateIdentityResponseDto { new_did }))
}

async fn continuity_chain(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
) -> Result<Json<ContinuityChainDto>, Error> {
    Ok(Json(ContinuityChainDto {
        chain: app.continuity_chain(&did).await?,
    }))
}

async fn issue_credential(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
    Json(request): Json<IssueCredentialRequestDto>,
) -> Result<(StatusCode, Json<CredentialDto>), Error> {
    let credential = app
        .issue_credential(
            &did,
            &request.issuer_did,
            request.issuer_approved,
            &request.credential_type,
            request.expires_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(credential.into())))
}

async fn list_credentials(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
) -> Result<Json<Vec<CredentialDto>>, Error> {
    Ok(Json(app.list_credentials(&did).await?.into_iter().map(CredentialDto::from).collect()))
}

async fn revoke_credential(State(app): State<Arc<App>>, Path(hash): Path<String>) -> Result<(), Error> {
    app.revoke_credential(&hash).await?;
    Ok(())
}

async fn get_credential(
    State(app): State<Arc<App>>,
    Path(hash): Path<String>,
) -> Result<Json<CredentialDto>, Error> {
    Ok(Json(app.get_credential(&hash).await?.into()))
}

/// Policy-verify lookup: recomputes the tier a subject would currently
/// receive, given an optional `assistanceProfile` query parameter (defaults
/// to `human-only`, matching the intake pipeline's own default).
async fn tier_for_subject(
    State(app): State<Arc<App>>,
    Path(did): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<TierDto>, Error> {
    let assistance_profile = data::parse_assistance_profile(params.get("assistanceProfile").map(String::as_str))?
        .unwrap_or(crate::credential::AssistanceProfile::HumanOnly);
    Ok(Json(TierDto {
        tier: app.tier_for_subject(&did, assistance_profile).await?,
    }))
}

async fn reputation(State(app): State<Arc<App>>, Path(did): Path<String>) -> Result<Json<ReputationDto>, Error> {
    let snapshot = app.reputation_snapshot(&did).ok_or(Error::NotFound)?;
    let (reputation, _rate_limit): (ReputationDto, RateLimitDto) = snapshot.into();
    Ok(Json(reputation))
}

async fn rate_limit(State(app): State<Arc<App>>, Path(did): Path<String>) -> Result<Json<RateLimitDto>, Error> {
    let snapshot = app.reputation_snapshot(&did).ok_or(Error::NotFound)?;
    let (_reputation, rate_limit): (ReputationDto, RateLimitDto) = snapshot.into();
    Ok(Json(rate_limit))
}

async fn sync_status(State(app): State<Arc<App>>) -> Result<Json<SyncStatusDto>, Error> {
    let latest = app.database.get_latest_batch().await?;
    Ok(Json(SyncStatusDto {
        root:   latest.as_ref().map(|b| b.root.clone()).unwrap_or_default(),
        height: latest.map(|b| b.id).unwrap_or_default(),
    }))
}

async fn sync_merkle_root(State(app): State<Arc<App>>) -> Result<Json<Option<String>>, Error> {
    Ok(Json(app.database.get_latest_batch().await?.map(|b| b.root)))
}

async fn sync_proofs(State(app): State<Arc<App>>) -> Result<Json<Vec<SyncProofDto>>, Error> {
    let pending = app.database.list_pending_proofs(app.config.batch.batch_size as i64).await?;
    Ok(Json(pending.iter().map(SyncProofDto::from).collect()))
}

/// Serves the most recently sealed batch's leaves, the unit a peer's
/// `SyncCoordinator` pulls when gap-repairing; best-effort only, one batch
/// at a time.
async fn sync_batches(State(app): State<Arc<App>>) -> Result<Json<Vec<SyncBatchDto>>, Error> {
    let Some(latest) = app.database.get_latest_batch().await? else {
        return Ok(Json(Vec::new()));
    };
    let proofs = app.database.list_proofs_by_batch(latest.id).await?;
    Ok(Json(vec![SyncBatchDto {
        root:   latest.root,
        leaves: proofs.iter().map(SyncProofDto::from).collect(),
    }]))
}

async fn add_peer(State(app): State<Arc<App>>, Json(request): Json<AddPeerRequestDto>) -> Result<(), Error> {
    app.add_peer(&request.base_url).await?;
    Ok(())
}

async fn health() -> Result<(), Error> {
    Ok(())
}

async fn metrics() -> Result<Response<Body>, Error> {
    let encoder = TextEncoder::new();

    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Invalid(e.to_string()))?;

    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .map_err(|e| Error::Invalid(e.to_string()))?;

    Ok(response)
}

/// # Errors
///
/// Will return `Err` if `config.address` cannot be bound.
pub async fn run(app: Arc<App>, config: ServerConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    info!("Will listen on {}", config.address);
    let listener = TcpListener::bind(config.address)?;

    bind_from_listener(app, config.serve_timeout, listener, shutdown).await?;

    Ok(())
}

/// # Errors
///
/// Will return `Err` if the provided `listener` address cannot be accessed or
/// if the server fails to bind to the given address.
pub async fn bind_from_listener(
    app: Arc<App>,
    serve_timeout: Duration,
    listener: TcpListener,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let auth_validator = crate::utils::auth::AuthValidator::new(
        app.config.server.auth_mode,
        app.config.server.basic_auth_credentials.clone(),
        &app.config.server.authorized_keys,
    )?;

    let protected_routes = Router::new()
        .route("/pohw/attest", post(attest))
        .route("/pohw/verify/index.json", get(federation_descriptor))
        .route("/pohw/verify/:hash", get(verify))
        .route("/pohw/proof/:hash", get(get_proof))
        .route("/pohw/claim/:hash", get(get_claim))
        .route("/pohw/batch/create", post(create_batch))
        .route("/pohw/batch/anchor/:batch_id", post(anchor_batch))
        .route("/pohw/batch/:batch_id/anchors", get(batch_anchors))
        .route("/pohw/status", get(status))
        .route("/pohw/did/register", post(register_identity))
        .route("/pohw/did/:did", get(resolve_identity))
        .route("/pohw/did/:did/rotate", post(rotate_identity))
        .route("/pohw/did/:did/continuity", get(continuity_chain))
        .route("/pohw/attestors/:did/credentials", post(issue_credential).get(list_credentials))
        .route("/pohw/attestors/credentials/:hash", get(get_credential).delete(revoke_credential))
        .route("/pohw/attestors/:did/tier", get(tier_for_subject))
        .route("/pohw/reputation/:id", get(reputation))
        .route("/pohw/rate-limit/:id", get(rate_limit))
        .route("/pohw/sync/status", get(sync_status))
        .route("/pohw/sync/merkle-root", get(sync_merkle_root))
        .route("/pohw/sync/proofs", get(sync_proofs))
        .route("/pohw/sync/batches", get(sync_batches))
        .route("/pohw/sync/peers", post(add_peer))
        .route_layer(middleware::from_fn_with_state(auth_validator, custom_middleware::auth_layer::middleware));

    let public_routes = Router::new().route("/health", get(health)).route("/metrics", get(metrics));

    let router = protected_routes
        .merge(public_routes)
        .layer(middleware::from_fn(custom_middleware::api_metrics_layer::middleware))
        .layer(middleware::from_fn_with_state(
            serve_timeout,
            custom_middleware::timeout_layer::middleware,
        ))
        .layer(middleware::from_fn(custom_middleware::logging_layer::middleware))
        .with_state(app.clone());

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown.await_shutdown().await;
    });

    server.await?;

    Ok(())
}
