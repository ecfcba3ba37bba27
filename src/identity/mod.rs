//! Decentralized identifiers and the key-continuity graph.
//!
//! A `did:pohw:<method-specific-id>` is self-certifying: the method-specific
//! id is `H(public_key)`, so resolving an identity never requires trusting a
//! third party. Rotations form a single-parent chain (the Key Continuity
//! Graph): each edge is a `ContinuityClaim` carrying bilateral signatures
//! from both the retiring and the incoming key.

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use crate::database::methods::DbMethods as _;
use crate::database::types::IdentityRecord;
use crate::database::{Database, Error as StoreError};

pub const DID_METHOD: &str = "pohw";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("invalid signature over continuity claim")]
    InvalidSignature,
    #[error("identity not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A resolved identity document plus its current lifecycle status.
#[derive(Debug, Clone)]
pub struct Document {
    pub did:            String,
    pub public_key_pem:  String,
    pub status:          IdentityStatus,
    pub parent_did:      Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Rotated,
}

impl From<IdentityRecord> for Document {
    fn from(record: IdentityRecord) -> Self {
        let status = match record.status.as_str() {
            "rotated" => IdentityStatus::Rotated,
            _ => IdentityStatus::Active,
        };
        Self {
            did: record.did,
            public_key_pem: record.public_key_pem,
            status,
            parent_did: record.parent_did,
        }
    }
}

pub struct ContinuityEdge {
    pub parent_did: String,
    pub child_did:  String,
}

/// Derives `did:pohw:<hex(H(public_key_pem))>` for a PEM-encoded public key.
#[must_use]
pub fn derive_did(public_key_pem: &str) -> String {
    let digest = Sha256::digest(public_key_pem.as_bytes());
    format!("did:{DID_METHOD}:{}", hex::encode(digest))
}

fn parse_verifying_key(public_key_pem: &str) -> Result<VerifyingKey, IdentityError> {
    VerifyingKey::from_public_key_pem(public_key_pem).map_err(|_| IdentityError::MalformedKey)
}

fn parse_signature(hex_sig: &str) -> Result<Signature, IdentityError> {
    let bytes = hex::decode(hex_sig).map_err(|_| IdentityError::InvalidSignature)?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| IdentityError::InvalidSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Registers a brand-new identity for a freshly generated public key. There
/// is no prior chain; the new identity is its own root.
#[instrument(skip(database, public_key_pem), level = "debug")]
pub async fn generate(
    database: &Database,
    public_key_pem: &str,
) -> Result<Document, IdentityError> {
    // Validate the key parses before committing to a DID derived from it.
    parse_verifying_key(public_key_pem)?;

    let did = derive_did(public_key_pem);
    let record = database.put_identity(&did, public_key_pem, None).await?;

    Ok(record.into())
}

#[instrument(skip(database), level = "debug")]
pub async fn resolve(database: &Database, did: &str) -> Result<Document, IdentityError> {
    database
        .get_identity(did)
        .await?
        .map(Document::from)
        .ok_or(IdentityError::NotFound)
}

/// Rotates `old_did` to a new key. Both the old and new keys must sign the
/// canonical tuple `H(old_public_key || new_public_key || last_anchor ||
/// registry_timestamp)`, where `registry_timestamp` is supplied by the
/// caller (both key holders need to agree on it before either can produce a
/// valid signature) rather than chosen by the registry at call time. A
/// missing or invalid signature aborts the call without mutating any stored
/// state.
#[instrument(skip_all, level = "debug")]
pub async fn rotate(
    database: &Database,
    old_did: &str,
    new_public_key_pem: &str,
    last_anchor: Option<&str>,
    registry_timestamp: &str,
    old_key_signature_hex: &str,
    new_key_signature_hex: &str,
) -> Result<(String, ContinuityEdge), IdentityError> {
    let current = database
        .get_identity(old_did)
        .await?
        .ok_or(IdentityError::NotFound)?;

    let old_key = parse_verifying_key(&current.public_key_pem)?;
    let new_key = parse_verifying_key(new_public_key_pem)?;

    let message = canonical_rotation_message(
        &current.public_key_pem,
        new_public_key_pem,
        last_anchor,
        registry_timestamp,
    );

    let old_sig = parse_signature(old_key_signature_hex)?;
    let new_sig = parse_signature(new_key_signature_hex)?;

    old_key
        .verify(&message, &old_sig)
        .map_err(|_| IdentityError::InvalidSignature)?;
    new_key
        .verify(&message, &new_sig)
        .map_err(|_| IdentityError::InvalidSignature)?;

    let new_did = derive_did(new_public_key_pem);

    database
        .rotate_identity_key(
            old_did,
            &new_did,
            new_public_key_pem,
            old_key_signature_hex,
            new_key_signature_hex,
        )
        .await?;

    Ok((
        new_did.clone(),
        ContinuityEdge {
            parent_did: old_did.to_owned(),
            child_did:  new_did,
        },
    ))
}

fn canonical_rotation_message(
    old_public_key_pem: &str,
    new_public_key_pem: &str,
    last_anchor: Option<&str>,
    registry_timestamp: &str,
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(old_public_key_pem.as_bytes());
    hasher.update(new_public_key_pem.as_bytes());
    hasher.update(last_anchor.unwrap_or_default().as_bytes());
    hasher.update(registry_timestamp.as_bytes());
    hasher.finalize().to_vec()
}

/// Returns the continuity chain for `did`, from root to head, regardless of
/// which identity in the chain `did` names: walks `parent_did` backward to
/// find the root, then walks the reverse edge (one child per parent, since
/// only one identity may be active per chain) forward to find the head.
#[instrument(skip(database), level = "debug")]
pub async fn continuity_chain(
    database: &Database,
    did: &str,
) -> Result<Vec<String>, IdentityError> {
    let start = database.get_identity(did).await?.ok_or(IdentityError::NotFound)?;

    let mut ancestors = vec![start.did.clone()];
    let mut current = start.clone();
    while let Some(parent_did) = current.parent_did.clone() {
        let parent = database.get_identity(&parent_did).await?.ok_or(IdentityError::NotFound)?;
        ancestors.push(parent.did.clone());
        current = parent;
    }
    ancestors.reverse();

    let mut head_did = start.did;
    let mut descendants = Vec::new();
    while let Some(child) = database.get_child_identity(&head_did).await? {
        descendants.push(child.did.clone());
        head_did = child.did;
    }

    ancestors.extend(descendants);
    Ok(ancestors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_derivation_is_deterministic() {
        let pem = "-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----\n";
        assert_eq!(derive_did(pem), derive_did(pem));
        assert_ne!(derive_did(pem), derive_did("different"));
    }

    #[test]
    fn derived_did_has_expected_method() {
        let did = derive_did("some-key-material");
        assert!(did.starts_with("did:pohw:"));
    }
}
