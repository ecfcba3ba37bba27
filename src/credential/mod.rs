//! Credential issuance, revocation, and tier computation.
//!
//! Grounded on the repository/validator split used elsewhere in this tree
//! for policy objects: a thin repository does the persistence, a pure
//! function carries the policy so it can be unit tested without a database.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use crate::database::methods::DbMethods as _;
use crate::database::types::{CredentialRecord, Tier};
use crate::database::{Database, Error as StoreError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("issuer is not an approved attestor")]
    UnapprovedIssuer,
    #[error("credential not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Label describing how much AI assistance went into a piece of work, as
/// self-reported by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistanceProfile {
    HumanOnly,
    AiAssisted,
    AiGenerated,
}

impl AssistanceProfile {
    #[must_use]
    pub fn declares_ai_involvement(self) -> bool {
        matches!(self, Self::AiAssisted | Self::AiGenerated)
    }
}

impl std::str::FromStr for AssistanceProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "human-only" => Self::HumanOnly,
            "AI-assisted" => Self::AiAssisted,
            "AI-generated" => Self::AiGenerated,
            other => anyhow::bail!("unknown assistance profile '{other}'"),
        })
    }
}

/// A repository over the credential table. `issuer_is_approved` is injected
/// rather than hardcoded so the approval policy can evolve independently of
/// storage.
pub struct CredentialRepository<'a> {
    database: &'a Database,
}

impl<'a> CredentialRepository<'a> {
    #[must_use]
    pub fn new(database: &'a Database) -> Self {
        Self { database }
    }

    /// Issues a credential, identified by a hash of its content so two
    /// issuers can never silently collide and so revocation can target a
    /// single credential without ambiguity when a subject holds several.
    #[instrument(skip(self), level = "debug")]
    pub async fn issue(
        &self,
        subject_did: &str,
        issuer_did: &str,
        issuer_approved: bool,
        credential_type: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialRecord, CredentialError> {
        if !issuer_approved {
            return Err(CredentialError::UnapprovedIssuer);
        }

        let issued_at = Utc::now();
        let hash = credential_hash(subject_did, issuer_did, credential_type, issued_at);

        Ok(self
            .database
            .put_credential(&hash, subject_did, issuer_did, credential_type, issued_at, expires_at)
            .await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn revoke(&self, credential_hash: &str) -> Result<(), CredentialError> {
        self.database.revoke_credential(credential_hash).await.map_err(|err| match err {
            StoreError::NotFound => CredentialError::NotFound,
            other => other.into(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, credential_hash: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        Ok(self.database.get_credential(credential_hash).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self, subject_did: &str) -> Result<Vec<CredentialRecord>, CredentialError> {
        Ok(self.database.list_credentials_for_subject(subject_did).await?)
    }

    /// Computes the tiering inputs (distinct-issuer count, any-valid flag)
    /// from the subject's currently-valid credentials, then applies
    /// [`tier_for`]. This is the "policy-verify" lookup surfaced over
    /// `/pohw/attestors/{did}/tier`, and the same path the intake pipeline
    /// uses internally.
    #[instrument(skip(self), level = "debug")]
    pub async fn tier_for_subject(&self, subject_did: &str, assistance_profile: AssistanceProfile) -> Result<Tier, CredentialError> {
        let now = Utc::now();
        let credentials = self.list(subject_did).await?;

        let valid: Vec<&CredentialRecord> = credentials.iter().filter(|c| c.is_valid_at(now)).collect();
        let distinct_issuers: std::collections::HashSet<&str> = valid.iter().map(|c| c.issuer_did.as_str()).collect();

        Ok(tier_for(assistance_profile, distinct_issuers.len(), !valid.is_empty()))
    }
}

/// A credential's identity is the hash of everything that makes it unique:
/// who it's for, who issued it, what kind it is, and when. Two identical
/// issuances a moment apart are still distinct credentials.
fn credential_hash(subject_did: &str, issuer_did: &str, credential_type: &str, issued_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_did.as_bytes());
    hasher.update(b"|");
    hasher.update(issuer_did.as_bytes());
    hasher.update(b"|");
    hasher.update(credential_type.as_bytes());
    hasher.update(b"|");
    hasher.update(issued_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

/// Tiering policy: AI involvement always takes the submitter to `purple`
/// regardless of credentials. Absent that, the best standing credential
/// (counted only while unrevoked) decides the rest.
///
/// `distinct_attestor_domains` is the count of distinct issuer domains with
/// a currently-valid credential for this identity; callers derive it from
/// `CredentialRepository` lookups before calling this pure function.
#[must_use]
pub fn tier_for(assistance_profile: AssistanceProfile, distinct_attestor_domains: usize, has_any_valid_credential: bool) -> Tier {
    if assistance_profile.declares_ai_involvement() {
        return Tier::Purple;
    }

    if distinct_attestor_domains >= 2 {
        Tier::Green
    } else if has_any_valid_credential {
        Tier::Blue
    } else {
        Tier::Grey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_involvement_always_wins_purple() {
        assert_eq!(tier_for(AssistanceProfile::AiAssisted, 5, true), Tier::Purple);
        assert_eq!(tier_for(AssistanceProfile::AiGenerated, 0, false), Tier::Purple);
    }

    #[test]
    fn two_or_more_attestor_domains_is_green() {
        assert_eq!(tier_for(AssistanceProfile::HumanOnly, 2, true), Tier::Green);
    }

    #[test]
    fn single_valid_credential_is_blue() {
        assert_eq!(tier_for(AssistanceProfile::HumanOnly, 1, true), Tier::Blue);
    }

    #[test]
    fn no_credentials_is_grey() {
        assert_eq!(tier_for(AssistanceProfile::HumanOnly, 0, false), Tier::Grey);
    }
}
