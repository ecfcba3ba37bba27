//! Composition root: wires the store and every domain module behind a
//! single handle the server and task monitor both hold.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::anchor::bitcoin::BitcoinBroadcaster;
use crate::anchor::ethereum::EthereumBroadcaster;
use crate::anchor::{broadcast_with_retry, Broadcaster};
use crate::attestation::{self, AttestRequest, Receipt};
use crate::claim::{self, Claim};
use crate::config::Config;
use crate::credential::{AssistanceProfile, CredentialRepository};
use crate::database::methods::DbMethods as _;
use crate::database::types::{AnchorRecord, BatchRecord, Chain, CredentialRecord, ProofRecord, Tier};
use crate::database::Database;
use crate::federation::SyncCoordinator;
use crate::identity::{self, ContinuityEdge, Document};
use crate::merkle;
use crate::reputation::ReputationEngine;

pub use error::Error;

/// Registry-wide status snapshot, served from `/pohw/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSummary {
    pub registry_id:    String,
    pub pending_proofs: i64,
    pub latest_batch:   Option<BatchRecord>,
    pub known_peers:    usize,
}

pub struct App {
    pub database:     Arc<Database>,
    pub reputation:   ReputationEngine,
    pub broadcasters: HashMap<Chain, Box<dyn Broadcaster>>,
    pub sync:         Option<SyncCoordinator>,
    pub config:       Config,
}

impl App {
    #[instrument(skip_all)]
    pub fn new(database: Arc<Database>, config: Config) -> Arc<Self> {
        let reputation = ReputationEngine::new(config.reputation.clone());

        let mut broadcasters: HashMap<Chain, Box<dyn Broadcaster>> = HashMap::new();
        if let Some(bitcoin_config) = &config.anchor.bitcoin {
            broadcasters.insert(Chain::Bitcoin, Box::new(BitcoinBroadcaster::new(bitcoin_config.clone())));
        }
        if let Some(ethereum_config) = &config.anchor.ethereum {
            broadcasters.insert(Chain::Ethereum, Box::new(EthereumBroadcaster::new(ethereum_config.clone())));
        }

        let sync = (!config.federation.peers.0.is_empty())
            .then(|| SyncCoordinator::new(database.clone(), config.federation.outbound_concurrency));

        Arc::new(Self {
            database,
            reputation,
            broadcasters,
            sync,
            config,
        })
    }

    #[instrument(skip(self, request), level = "debug")]
    pub async fn attest(&self, request: AttestRequest) -> Result<Receipt, Error> {
        Ok(attestation::attest(&self.database, &self.reputation, &self.config.service.node_did, request).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_proof(&self, artifact_hash: &str) -> Result<ProofRecord, Error> {
        self.database
            .get_proof_by_hash(artifact_hash)
            .await?
            .ok_or(Error::NotFound)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_claim(&self, artifact_hash: &str) -> Result<Claim, Error> {
        Ok(claim::compose(&self.database, artifact_hash).await?)
    }

    /// Seals whatever proofs are pending into a new Merkle batch, honoring
    /// the configured minimum batch size unless `force` is set (used by the
    /// `/pohw/batch/create` manual endpoint and the periodic batcher task).
    #[instrument(skip(self), level = "debug")]
    pub async fn seal_batch_now(&self, force: bool) -> Result<Option<BatchRecord>, Error> {
        let sealed = merkle::seal_pending_batch(&self.database, self.config.batch.batch_size, force).await?;
        Ok(sealed.map(|(batch, _tree)| batch))
    }

    /// Opens an anchoring attempt for `batch_id` on `chain` and broadcasts
    /// it, retrying the broadcast step per the configured backoff policy.
    #[instrument(skip(self), level = "debug")]
    pub async fn anchor_batch(&self, batch_id: i64, chain: Chain) -> Result<AnchorRecord, Error> {
        let batch = self.database.get_batch(batch_id).await?.ok_or(Error::NotFound)?;

        let broadcaster = self
            .broadcasters
            .get(&chain)
            .ok_or_else(|| Error::Invalid(format!("no broadcaster configured for chain {chain}")))?;

        let anchor = self.database.open_anchor(batch_id, chain).await?;

        let root_bytes: [u8; 32] = hex::decode(&batch.root)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| Error::Invalid("stored batch root is not 32 bytes".into()))?;

        let result = broadcast_with_retry(
            self.config.anchor.retry_base,
            self.config.anchor.retry_max_attempts,
            || broadcaster.broadcast(&root_bytes, &self.config.service.node_did),
        )
        .await;

        match result {
            Ok(tx_id) => {
                self.database.mark_anchor_broadcast(anchor.id, &tx_id).await?;
            }
            Err(err) => {
                self.database.mark_anchor_failed(anchor.id, err.kind, &err.message).await?;
                return Err(Error::AnchorFailed(err));
            }
        }

        self.database
            .list_anchors_for_batch(batch_id)
            .await?
            .into_iter()
            .find(|a| a.id == anchor.id)
            .ok_or(Error::NotFound)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn batch_anchors(&self, batch_id: i64) -> Result<Vec<AnchorRecord>, Error> {
        Ok(self.database.list_anchors_for_batch(batch_id).await?)
    }

    /// Polls every unconfirmed anchor on `chain` against its broadcaster and
    /// updates the stored confirmation count, marking it `confirmed` once it
    /// clears the chain's configured confirmation threshold.
    #[instrument(skip(self), level = "debug")]
    pub async fn poll_confirmations(&self, chain: Chain) -> Result<usize, Error> {
        let Some(broadcaster) = self.broadcasters.get(&chain) else {
            return Ok(0);
        };

        let required = match chain {
            Chain::Bitcoin => self.config.anchor.bitcoin.as_ref().map(|c| c.confirmations_required),
            Chain::Ethereum => self.config.anchor.ethereum.as_ref().map(|c| c.confirmations_required),
        }
        .unwrap_or(1);

        let unconfirmed = self.database.list_unconfirmed_anchors().await?;
        let mut updated = 0;

        for anchor in unconfirmed.into_iter().filter(|a| a.chain == chain) {
            let Some(tx_id) = &anchor.tx_id else { continue };
            match broadcaster.confirmations(tx_id).await {
                Ok(confirmations) => {
                    self.database
                        .update_anchor_confirmations(anchor.id, confirmations as i32, confirmations >= required)
                        .await?;
                    updated += 1;
                }
                Err(err) => {
                    tracing::warn!(chain = %chain, anchor_id = anchor.id, error = %err, "confirmation poll failed");
                }
            }
        }

        Ok(updated)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn status(&self) -> Result<StatusSummary, Error> {
        Ok(StatusSummary {
            registry_id:    self.config.service.node_did.clone(),
            pending_proofs: self.database.count_pending_proofs().await?,
            latest_batch:   self.database.get_latest_batch().await?,
            known_peers:    self.database.list_peers().await?.len(),
        })
    }

    // -- Identity ---------------------------------------------------------

    #[instrument(skip(self), level = "debug")]
    pub async fn generate_identity(&self, public_key_pem: &str) -> Result<Document, Error> {
        Ok(identity::generate(&self.database, public_key_pem).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn resolve_identity(&self, did: &str) -> Result<Document, Error> {
        Ok(identity::resolve(&self.database, did).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn rotate_identity(
        &self,
        old_did: &str,
        new_public_key_pem: &str,
        last_anchor: Option<&str>,
        registry_timestamp: &str,
        old_key_signature_hex: &str,
        new_key_signature_hex: &str,
    ) -> Result<(String, ContinuityEdge), Error> {
        Ok(identity::rotate(
            &self.database,
            old_did,
            new_public_key_pem,
            last_anchor,
            registry_timestamp,
            old_key_signature_hex,
            new_key_signature_hex,
        )
        .await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn continuity_chain(&self, did: &str) -> Result<Vec<String>, Error> {
        Ok(identity::continuity_chain(&self.database, did).await?)
    }

    // -- Credentials --------------------------------------------------------

    #[instrument(skip(self), level = "debug")]
    pub async fn issue_credential(
        &self,
        subject_did: &str,
        issuer_did: &str,
        issuer_approved: bool,
        credential_type: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<CredentialRecord, Error> {
        Ok(CredentialRepository::new(&self.database)
            .issue(subject_did, issuer_did, issuer_approved, credential_type, expires_at)
            .await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn revoke_credential(&self, credential_hash: &str) -> Result<(), Error> {
        Ok(CredentialRepository::new(&self.database).revoke(credential_hash).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_credential(&self, credential_hash: &str) -> Result<CredentialRecord, Error> {
        CredentialRepository::new(&self.database)
            .get(credential_hash)
            .await?
            .ok_or(Error::NotFound)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn list_credentials(&self, subject_did: &str) -> Result<Vec<CredentialRecord>, Error> {
        Ok(CredentialRepository::new(&self.database).list(subject_did).await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn tier_for_subject(&self, subject_did: &str, assistance_profile: AssistanceProfile) -> Result<Tier, Error> {
        Ok(CredentialRepository::new(&self.database)
            .tier_for_subject(subject_did, assistance_profile)
            .await?)
    }

    // -- Reputation ---------------------------------------------------------

    #[must_use]
    pub fn reputation_snapshot(&self, identity_did: &str) -> Option<crate::reputation::Snapshot> {
        self.reputation.snapshot(identity_did, Utc::now())
    }

    // -- Federation -----------------------------------------------------

    #[instrument(skip(self), level = "debug")]
    pub async fn add_peer(&self, base_url: &str) -> Result<(), Error> {
        match &self.sync {
            Some(sync) => Ok(sync.add_peer(base_url).await?),
            None => {
                self.database.put_peer(base_url).await?;
                Ok(())
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn sync_peer(&self, base_url: &str) -> Result<(), Error> {
        match &self.sync {
            Some(sync) => Ok(sync.sync_peer(base_url).await?),
            None => Err(Error::Invalid("federation sync is not enabled".into())),
        }
    }
}
