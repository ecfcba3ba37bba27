//! Attestation intake: the admission pipeline that turns a signed submission
//! into a persisted, unbatched `Proof` row.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::credential::{AssistanceProfile, CredentialRepository};
use crate::database::methods::DbMethods as _;
use crate::database::types::{ProofRecord, Tier};
use crate::credential::CredentialError;
use crate::database::{Database, Error as StoreError};
use crate::reputation::{Denial, ReputationEngine};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed request: {0}")]
    Invalid(String),
    #[error("proof already attested")]
    Conflict,
    #[error("rate limited, current rate {current_rate}")]
    RateLimited { current_rate: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// The shape of an incoming attestation submission, independent of the
/// transport (HTTP body, federation import) that produced it.
#[derive(Debug, Clone)]
pub struct AttestRequest {
    pub artifact_hash:     String,
    pub signature:         String,
    pub identity_did:      String,
    pub client_timestamp:  chrono::DateTime<Utc>,
    pub process_digest:    Option<String>,
    pub compound_hash:     Option<String>,
    pub process_metrics:   Option<JsonValue>,
    pub derived_from:      Option<JsonValue>,
    pub assistance_profile: Option<AssistanceProfile>,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub receipt_hash:     String,
    pub server_timestamp: chrono::DateTime<Utc>,
    pub registry_id:      String,
    pub tier:             Tier,
}

fn is_valid_hash(s: &str) -> bool {
    s.len() == 66 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_well_formed_did(s: &str) -> bool {
    s.starts_with("did:") && s.matches(':').count() >= 2 && s.len() > "did::".len()
}

/// Canonical JSON for hashing: sorted keys, no whitespace. `serde_json`'s
/// `Value` equality/ordering for `Map` already sorts keys when the
/// `preserve_order` feature is off, so `to_string` is already canonical.
fn canonical_json(value: &JsonValue) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Runs the admission procedure in order, failing fast at the first invalid step.
#[instrument(skip(database, reputation, request), fields(artifact_hash = %request.artifact_hash), level = "debug")]
pub async fn attest(
    database: &Database,
    reputation: &ReputationEngine,
    registry_id: &str,
    request: AttestRequest,
) -> Result<Receipt, IntakeError> {
    // 1. Syntactic validation.
    if !is_valid_hash(&request.artifact_hash) {
        return Err(IntakeError::Invalid("hash must be a 32-byte 0x-prefixed hex string".into()));
    }
    if !is_well_formed_did(&request.identity_did) {
        return Err(IntakeError::Invalid("identity is not a well-formed DID".into()));
    }

    // 2. Rate/reputation admission.
    let now = Utc::now();
    if let Err(denial) = reputation.allow(&request.identity_did, now) {
        return Err(match denial {
            Denial::RateLimited { current_rate } => IntakeError::RateLimited { current_rate },
            Denial::TooSoon => IntakeError::RateLimited { current_rate: 0 },
            Denial::ScoreTooLow { .. } => IntakeError::RateLimited { current_rate: 0 },
        });
    }

    // 3. Duplicate check.
    if database.get_proof_by_hash(&request.artifact_hash).await?.is_some() {
        reputation.record_failure(&request.identity_did, now, "duplicate attestation");
        return Err(IntakeError::Conflict);
    }

    // 4. Internal consistency of process metrics / compound hash.
    if let (Some(metrics), Some(digest)) = (&request.process_metrics, &request.process_digest) {
        let recomputed = sha256_hex(canonical_json(metrics).as_bytes());
        if &recomputed != digest {
            reputation.record_failure(&request.identity_did, now, "processDigest mismatch");
            warn!(did = %request.identity_did, "processDigest mismatch, rejecting attestation");
            return Err(IntakeError::Invalid("processDigest does not match processMetrics".into()));
        }
    }
    if let Some(compound) = &request.compound_hash {
        let digest = request.process_digest.as_deref().unwrap_or_default();
        let expected = sha256_hex(format!("{}{digest}", request.artifact_hash).as_bytes());
        if compound != &expected {
            reputation.record_failure(&request.identity_did, now, "compoundHash mismatch");
            return Err(IntakeError::Invalid("compoundHash does not match hash || processDigest".into()));
        }
    }

    // 5. Tier computation from credentials and assistance profile.
    let assistance_profile = request.assistance_profile.unwrap_or(AssistanceProfile::HumanOnly);
    let tier = CredentialRepository::new(database)
        .tier_for_subject(&request.identity_did, assistance_profile)
        .await?;

    // 6. Persist.
    let metadata = request.process_metrics.clone().unwrap_or(JsonValue::Null);
    let proof: ProofRecord = database
        .put_proof(
            &request.artifact_hash,
            &request.identity_did,
            &request.signature,
            Some(request.client_timestamp),
            &metadata,
            None,
        )
        .await?;

    reputation.record_success(&request.identity_did, now);

    // 7. "Emit pending signal to batcher" — the batcher instead polls
    // `list_pending_proofs`/`count_pending_proofs` on its own schedule, so
    // there is no explicit channel send here; the persisted row is the
    // signal.

    // 8. Receipt.
    Ok(Receipt {
        receipt_hash:     sha256_hex(proof.artifact_hash.as_bytes()),
        server_timestamp: proof.server_timestamp,
        registry_id:      registry_id.to_owned(),
        tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_hash_format() {
        assert!(is_valid_hash(&format!("0x{}", "a".repeat(64))));
        assert!(!is_valid_hash("0xnothex"));
        assert!(!is_valid_hash("aaaa"));
    }

    #[test]
    fn well_formed_did() {
        assert!(is_well_formed_did("did:pohw:u1"));
        assert!(!is_well_formed_did("not-a-did"));
    }

    #[test]
    fn canonical_json_is_stable() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
