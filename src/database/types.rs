use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Credential tier assigned to an attestor's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Grey,
    Blue,
    Green,
    Purple,
    /// Reserved for a future pluggable accreditation hook; treated as a
    /// no-op today but already representable end to end.
    Bronze,
    Silver,
    Gold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Grey => "grey",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Purple => "purple",
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        };
        f.write_str(s)
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "grey" => Self::Grey,
            "blue" => Self::Blue,
            "green" => Self::Green,
            "purple" => Self::Purple,
            "bronze" => Self::Bronze,
            "silver" => Self::Silver,
            "gold" => Self::Gold,
            other => anyhow::bail!("unknown credential tier '{other}'"),
        })
    }
}

/// The chain a batch root is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
        })
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bitcoin" => Self::Bitcoin,
            "ethereum" => Self::Ethereum,
            other => anyhow::bail!("unknown chain '{other}'"),
        })
    }
}

/// Lifecycle state of an anchoring attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Broadcast => "broadcast",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        })
    }
}

impl FromStr for AnchorStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "broadcast" => Self::Broadcast,
            "confirmed" => Self::Confirmed,
            "failed" => Self::Failed,
            other => anyhow::bail!("unknown anchor status '{other}'"),
        })
    }
}

/// Normalized anchoring error taxonomy, shared between the Bitcoin and
/// Ethereum engines so callers get a uniform remediation hint regardless of
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorErrorKind {
    InsufficientFunds,
    InvalidKey,
    RpcUnreachable,
    RejectedByNetwork,
    Unknown,
}

impl AnchorErrorKind {
    pub const fn remediation_hint(self) -> &'static str {
        match self {
            Self::InsufficientFunds => "fund the anchoring wallet and retry",
            Self::InvalidKey => "check the configured private key matches the funded address",
            Self::RpcUnreachable => "verify the RPC endpoint is reachable and retry",
            Self::RejectedByNetwork => "inspect the transaction parameters, it was rejected by a node or relay",
            Self::Unknown => "inspect the raw error message",
        }
    }
}

impl fmt::Display for AnchorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InsufficientFunds => "insufficient-funds",
            Self::InvalidKey => "invalid-key",
            Self::RpcUnreachable => "rpc-unreachable",
            Self::RejectedByNetwork => "rejected-by-network",
            Self::Unknown => "unknown",
        })
    }
}

impl FromStr for AnchorErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "insufficient-funds" => Self::InsufficientFunds,
            "invalid-key" => Self::InvalidKey,
            "rpc-unreachable" => Self::RpcUnreachable,
            "rejected-by-network" => Self::RejectedByNetwork,
            _ => Self::Unknown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub did:            String,
    pub public_key_pem:  String,
    pub parent_did:      Option<String>,
    pub rotation_seq:    i64,
    pub status:          String,
    pub created_at:      DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityClaimRecord {
    pub id:                 i64,
    pub did:                String,
    pub old_public_key_pem:  String,
    pub new_public_key_pem:  String,
    pub old_key_signature:   String,
    pub new_key_signature:   String,
    pub rotated_at:          DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub hash:            String,
    pub subject_did:     String,
    pub issuer_did:      String,
    pub credential_type: String,
    pub issued_at:       DateTime<Utc>,
    pub expires_at:      Option<DateTime<Utc>>,
    pub revoked_at:      Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// A credential counts toward tier only while unexpired and unrevoked.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |expires| now < expires)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub score:      i16,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub id:                i64,
    pub artifact_hash:     String,
    pub attestor_did:      String,
    pub signature:         String,
    pub server_timestamp:  DateTime<Utc>,
    pub claimed_timestamp: Option<DateTime<Utc>>,
    pub metadata:          JsonValue,
    pub batch_id:          Option<i64>,
    /// Base URL of the peer this proof was imported from, if any. `None`
    /// means the proof was attested directly by this registry.
    pub source_registry:   Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id:              i64,
    pub root:             String,
    pub leaf_count:       i32,
    pub sealed_at:        DateTime<Utc>,
    pub source_registry:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id:            i64,
    pub batch_id:      i64,
    pub chain:         Chain,
    pub tx_id:         Option<String>,
    pub status:        AnchorStatus,
    pub confirmations: i32,
    pub error_kind:    Option<AnchorErrorKind>,
    pub error_message: Option<String>,
    pub submitted_at:  DateTime<Utc>,
    pub confirmed_at:  Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub base_url:          String,
    pub last_synced_root:  Option<String>,
    pub last_synced_at:    Option<DateTime<Utc>>,
}
