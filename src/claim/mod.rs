//! Verifiable-claim composition: joins a proof, its batch, its anchors, and
//! its identity into a self-contained JSON-LD provenance document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

use crate::database::methods::DbMethods as _;
use crate::database::types::{AnchorRecord, AnchorStatus};
use crate::database::{Database, Error as StoreError};
use crate::merkle::{proof_hash_bytes, InclusionProof, Leaf, MerkleTree};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("proof not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorSummary {
    pub chain:         String,
    pub tx_id:         Option<String>,
    pub status:        String,
    pub confirmations: i32,
}

impl From<&AnchorRecord> for AnchorSummary {
    fn from(record: &AnchorRecord) -> Self {
        Self {
            chain:         record.chain.to_string(),
            tx_id:         record.tx_id.clone(),
            status:        record.status.to_string(),
            confirmations: record.confirmations,
        }
    }
}

/// A self-contained JSON-LD provenance document: given only this and the
/// confirmed anchor transactions, a verifier can recompute the Merkle root
/// and check chain inclusion without calling back into the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    #[serde(rename = "@context")]
    pub context:         &'static str,
    #[serde(rename = "@type")]
    pub claim_type:       &'static str,
    pub content_hash:      String,
    pub created_by:        String,
    pub created:            DateTime<Utc>,
    pub process_digest:     Option<String>,
    pub derived_from:       Vec<String>,
    pub derived_from_detail: Option<JsonValue>,
    pub merkle_root:        Option<String>,
    pub inclusion_proof:    Option<InclusionProofDto>,
    pub anchors:            Vec<AnchorSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InclusionProofDto {
    pub leaf_hash: String,
    pub root:      String,
    pub siblings:  Vec<SiblingDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiblingDto {
    pub hash:    String,
    pub is_left: bool,
}

impl From<&InclusionProof> for InclusionProofDto {
    fn from(proof: &InclusionProof) -> Self {
        Self {
            leaf_hash: hex::encode(proof.leaf_hash),
            root:      hex::encode(proof.root),
            siblings:  proof
                .steps
                .iter()
                .map(|s| SiblingDto {
                    hash:    hex::encode(s.sibling),
                    is_left: s.is_left,
                })
                .collect(),
        }
    }
}

/// `derivedFrom` may be a flat list of source identifiers, or a list of
/// `{text, source, sourceType, position}` objects. Either way we extract
/// the bare `source` strings for the JSON-LD array and keep the structured
/// form, if present, in `derived_from_detail`.
fn extract_derived_from(value: &JsonValue) -> (Vec<String>, Option<JsonValue>) {
    match value {
        JsonValue::Array(items) if items.iter().all(JsonValue::is_string) => {
            let sources = items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
            (sources, None)
        }
        JsonValue::Array(items) => {
            let sources = items
                .iter()
                .filter_map(|item| item.get("source").and_then(JsonValue::as_str).map(str::to_owned))
                .collect();
            (sources, Some(value.clone()))
        }
        _ => (Vec::new(), None),
    }
}

#[instrument(skip(database), level = "debug")]
pub async fn compose(database: &Database, artifact_hash: &str) -> Result<Claim, ClaimError> {
    let proof = database
        .get_proof_by_hash(artifact_hash)
        .await?
        .ok_or(ClaimError::NotFound)?;

    let (created, merkle_root, inclusion_proof, anchors) = if let Some(batch_id) = proof.batch_id {
        let batch = database.get_batch(batch_id).await?.ok_or(ClaimError::NotFound)?;

        // Rebuild the tree from every proof in the batch to recompute the
        // inclusion proof; this mirrors what an external verifier would do
        // with only the claim and the anchored root in hand. Only confirmed
        // anchors are surfaced: a pending or failed broadcast isn't yet a
        // fact a verifier can check on-chain.
        let anchors = database
            .list_anchors_for_batch(batch_id)
            .await?
            .iter()
            .filter(|a| a.status == AnchorStatus::Confirmed)
            .map(AnchorSummary::from)
            .collect();

        let batch_proofs = database.list_proofs_by_batch(batch_id).await?;
        let leaves: Vec<Leaf> = batch_proofs.iter().map(Leaf::from).collect();
        let tree = MerkleTree::build(leaves);
        // The tree re-sorts by `(server_timestamp, leaf hash)`, which can
        // diverge from the `(server_timestamp, artifact_hash)` order the
        // batch was queried in once two proofs share a timestamp, so the
        // leaf is located by its hash in the built tree rather than by its
        // position in `batch_proofs`.
        let target_hash = proof_hash_bytes(&proof.artifact_hash);
        let inclusion_proof = tree
            .leaf_index(&target_hash)
            .and_then(|i| tree.proof(i))
            .map(|p| InclusionProofDto::from(&p));

        (batch.sealed_at, Some(batch.root), inclusion_proof, anchors)
    } else {
        (proof.server_timestamp, None, None, Vec::new())
    };

    let metadata = &proof.metadata;
    let (derived_from, derived_from_detail) = metadata
        .get("derivedFrom")
        .map(extract_derived_from)
        .unwrap_or_default();

    let process_digest = metadata
        .get("processDigest")
        .and_then(JsonValue::as_str)
        .map(str::to_owned);

    Ok(Claim {
        context:              "https://pohw-registry.dev/contexts/v1",
        claim_type:            "ProvenanceClaim",
        content_hash:          proof.artifact_hash,
        created_by:            proof.attestor_did,
        created,
        process_digest,
        derived_from,
        derived_from_detail,
        merkle_root,
        inclusion_proof,
        anchors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_derived_from_extracts_directly() {
        let value = serde_json::json!(["src-a", "src-b"]);
        let (sources, detail) = extract_derived_from(&value);
        assert_eq!(sources, vec!["src-a", "src-b"]);
        assert!(detail.is_none());
    }

    #[test]
    fn structured_derived_from_extracts_source_field() {
        let value = serde_json::json!([{"text": "excerpt", "source": "pohw:abc", "sourceType": "pohw-hash", "position": {"start": 0, "end": 5}}]);
        let (sources, detail) = extract_derived_from(&value);
        assert_eq!(sources, vec!["pohw:abc"]);
        assert!(detail.is_some());
    }
}
