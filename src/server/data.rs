use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::app::StatusSummary;
use crate::credential::AssistanceProfile;
use crate::database::types::{AnchorRecord, BatchRecord, Chain, CredentialRecord, ProofRecord, Tier};
use crate::reputation::Snapshot;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct AttestRequestDto {
    pub hash:                String,
    pub signature:            String,
    pub identity:             String,
    pub timestamp:            DateTime<Utc>,
    pub process_digest:       Option<String>,
    pub compound_hash:        Option<String>,
    pub process_metrics:      Option<JsonValue>,
    pub derived_from:         Option<JsonValue>,
    pub assistance_profile:   Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDto {
    pub receipt_hash:     String,
    pub server_timestamp: DateTime<Utc>,
    pub registry_id:      String,
    pub tier:             Tier,
}

impl From<crate::attestation::Receipt> for ReceiptDto {
    fn from(receipt: crate::attestation::Receipt) -> Self {
        Self {
            receipt_hash:     receipt.receipt_hash,
            server_timestamp: receipt.server_timestamp,
            registry_id:      receipt.registry_id,
            tier:             receipt.tier,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponseDto {
    pub valid:            bool,
    pub identity:         String,
    pub server_timestamp: DateTime<Utc>,
    pub root:             Option<String>,
    pub inclusion_proof:  Option<crate::claim::InclusionProofDto>,
}

impl From<crate::claim::Claim> for VerifyResponseDto {
    fn from(claim: crate::claim::Claim) -> Self {
        Self {
            valid:            true,
            identity:         claim.created_by,
            server_timestamp: claim.created,
            root:             claim.merkle_root,
            inclusion_proof:  claim.inclusion_proof,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponseDto {
    pub root:            Option<String>,
    pub inclusion_proof: Option<crate::claim::InclusionProofDto>,
    pub anchors:         Vec<crate::claim::AnchorSummary>,
}

impl From<crate::claim::Claim> for ProofResponseDto {
    fn from(claim: crate::claim::Claim) -> Self {
        Self {
            root:            claim.merkle_root,
            inclusion_proof: claim.inclusion_proof,
            anchors:         claim.anchors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDto {
    pub id:         i64,
    pub root:       String,
    pub leaf_count: i32,
    pub sealed_at:  DateTime<Utc>,
}

impl From<BatchRecord> for BatchDto {
    fn from(batch: BatchRecord) -> Self {
        Self {
            id:         batch.id,
            root:       batch.root,
            leaf_count: batch.leaf_count,
            sealed_at:  batch.sealed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorDto {
    pub id:            i64,
    pub chain:         Chain,
    pub tx_id:         Option<String>,
    pub status:        String,
    pub confirmations: i32,
    pub error_kind:    Option<String>,
}

impl From<AnchorRecord> for AnchorDto {
    fn from(anchor: AnchorRecord) -> Self {
        Self {
            id:            anchor.id,
            chain:         anchor.chain,
            tx_id:         anchor.tx_id,
            status:        anchor.status.to_string(),
            confirmations: anchor.confirmations,
            error_kind:    anchor.error_kind.map(|k| k.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorBatchRequestDto {
    pub chain: Chain,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDto {
    pub registry_id:    String,
    pub pending_proofs: i64,
    pub latest_batch:   Option<BatchDto>,
    pub known_peers:    usize,
}

impl From<StatusSummary> for StatusDto {
    fn from(status: StatusSummary) -> Self {
        Self {
            registry_id:    status.registry_id,
            pending_proofs: status.pending_proofs,
            latest_batch:   status.latest_batch.map(BatchDto::from),
            known_peers:    status.known_peers,
        }
    }
}

/// Federation descriptor served at `/pohw/verify/index.json`; `created`
/// mirrors the latest sealed batch's own timestamp rather than wall-clock
/// time, so a verifier can tell whether the descriptor is stale.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationDescriptorDto {
    pub registry_id: String,
    pub root:        Option<String>,
    pub created:     Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct RegisterIdentityRequestDto {
    pub public_key_pem: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDto {
    pub did:            String,
    pub public_key_pem: String,
    pub status:         crate::identity::IdentityStatus,
    pub parent_did:     Option<String>,
}

impl From<crate::identity::Document> for IdentityDto {
    fn from(document: crate::identity::Document) -> Self {
        Self {
            did:            document.did,
            public_key_pem: document.public_key_pem,
            status:         document.status,
            parent_did:     document.parent_did,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct RotateIdentityRequestDto {
    pub new_public_key_pem:     String,
    pub last_anchor:            Option<String>,
    /// Timestamp both the old and new keys signed over; the caller picks
    /// this (e.g. by agreeing it out of band with whoever holds the new
    /// key) since both signatures must already cover it before this request
    /// is ever sent.
    pub registry_timestamp:     String,
    pub old_key_signature:      String,
    pub new_key_signature:      String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateIdentityResponseDto {
    pub new_did: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityChainDto {
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct IssueCredentialRequestDto {
    pub issuer_did:         String,
    #[serde(default)]
    pub issuer_approved:    bool,
    pub credential_type:    String,
    pub expires_at:         Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDto {
    pub hash:            String,
    pub subject_did:     String,
    pub issuer_did:      String,
    pub credential_type: String,
    pub issued_at:       DateTime<Utc>,
    pub expires_at:      Option<DateTime<Utc>>,
    pub revoked_at:      Option<DateTime<Utc>>,
}

impl From<CredentialRecord> for CredentialDto {
    fn from(record: CredentialRecord) -> Self {
        Self {
            hash:            record.hash,
            subject_did:     record.subject_did,
            issuer_did:      record.issuer_did,
            credential_type: record.credential_type,
            issued_at:       record.issued_at,
            expires_at:      record.expires_at,
            revoked_at:      record.revoked_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDto {
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationDto {
    pub score:          u8,
    pub success_count:  u64,
    pub failure_count:  u64,
    pub last_activity:  DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDto {
    pub current_rate: u32,
}

impl From<Snapshot> for (ReputationDto, RateLimitDto) {
    fn from(snapshot: Snapshot) -> Self {
        (
            ReputationDto {
                score:         snapshot.score,
                success_count: snapshot.success_count,
                failure_count: snapshot.failure_count,
                last_activity: snapshot.last_activity,
            },
            RateLimitDto {
                current_rate: snapshot.current_rate,
            },
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct AddPeerRequestDto {
    pub base_url: String,
}

/// Wire shapes served under `/pohw/sync/*`, field-for-field matching what
/// `federation::SyncCoordinator` expects when it parses a peer's response.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusDto {
    pub root:   String,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncProofDto {
    pub artifact_hash: String,
    pub attestor_did:  String,
    pub signature:     String,
}

impl From<&ProofRecord> for SyncProofDto {
    fn from(proof: &ProofRecord) -> Self {
        Self {
            artifact_hash: proof.artifact_hash.clone(),
            attestor_did:  proof.attestor_did.clone(),
            signature:     proof.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncBatchDto {
    pub root:   String,
    pub leaves: Vec<SyncProofDto>,
}

/// Resolves the optional `assistanceProfile` string on an attestation
/// request; an unrecognized value is treated as a malformed request rather
/// than silently defaulting, so callers learn about typos immediately.
pub fn parse_assistance_profile(raw: Option<&str>) -> Result<Option<AssistanceProfile>, crate::app::Error> {
    raw.map(str::parse)
        .transpose()
        .map_err(|e: anyhow::Error| crate::app::Error::Invalid(e.to_string()))
}
