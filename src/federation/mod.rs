//! Federation sync: exchanges batch Merkle roots with peer registries and
//! repairs gaps by pulling missing batches/proofs. Best-effort, no quorum —
//! a peer that never answers just gets skipped this round.

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use crate::database::methods::DbMethods as _;
use crate::database::transaction::ForeignProof;
use crate::database::{Database, Error as StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct PeerStatus {
    root:   String,
    height: i64,
}

#[derive(Debug, Deserialize)]
struct PeerBatch {
    root:           String,
    leaves:         Vec<PeerProof>,
}

#[derive(Debug, Deserialize)]
struct PeerProof {
    artifact_hash: String,
    attestor_did:  String,
    signature:     String,
}

/// Shared outbound rate limiter across all peer workers, sized by
/// `federation.outbound_concurrency`. Mirrors the teacher's use of
/// `tokio::sync` primitives for cooperative resource sharing rather than a
/// dedicated governor/tower-limiter dependency.
pub struct SyncCoordinator {
    database:   Arc<Database>,
    http:       Client,
    permits:    Arc<Semaphore>,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(database: Arc<Database>, outbound_concurrency: usize) -> Self {
        Self {
            database,
            http: Client::new(),
            permits: Arc::new(Semaphore::new(outbound_concurrency.max(1))),
        }
    }

    /// Runs one sync round against a single peer. Never overwrites local
    /// records: conflicts (same hash, different batch) are logged and
    /// skipped.
    #[instrument(skip(self), fields(peer = %peer_base_url), level = "debug")]
    pub async fn sync_peer(&self, peer_base_url: &str) -> Result<(), SyncError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("semaphore is never closed");

        self.database.put_peer(peer_base_url).await?;

        let status = self
            .http
            .get(format!("{peer_base_url}/pohw/sync/status"))
            .send()
            .await
            .map_err(|e| SyncError::PeerUnreachable(e.to_string()))?
            .json::<PeerStatus>()
            .await
            .map_err(|e| SyncError::PeerUnreachable(e.to_string()))?;

        let local_root = self
            .database
            .get_latest_batch()
            .await?
            .map(|b| b.root)
            .unwrap_or_default();

        if status.root == local_root {
            self.database.mark_peer_synced(peer_base_url, &status.root).await?;
            return Ok(());
        }

        let batches = self
            .http
            .get(format!("{peer_base_url}/pohw/sync/batches"))
            .send()
            .await
            .map_err(|e| SyncError::PeerUnreachable(e.to_string()))?
            .json::<Vec<PeerBatch>>()
            .await
            .map_err(|e| SyncError::PeerUnreachable(e.to_string()))?;

        for batch in batches {
            let proofs: Vec<ForeignProof> = batch
                .leaves
                .iter()
                .map(|p| ForeignProof {
                    artifact_hash: p.artifact_hash.clone(),
                    attestor_did:  p.attestor_did.clone(),
                    signature:     p.signature.clone(),
                })
                .collect();

            if let Err(err) = self
                .database
                .import_foreign_batch(peer_base_url, &batch.root, &proofs)
                .await
            {
                warn!(peer = %peer_base_url, root = %batch.root, error = %err, "failed to import peer batch, skipping");
            }
        }

        self.database.mark_peer_synced(peer_base_url, &status.root).await?;

        Ok(())
    }

    /// Runs a sync round against every known peer, tolerating individual
    /// peer failures.
    #[instrument(skip(self), level = "debug")]
    pub async fn sync_all(&self) {
        let peers = match self.database.list_peers().await {
            Ok(peers) => peers,
            Err(err) => {
                warn!(error = %err, "failed to list peers for sync round");
                return;
            }
        };

        for peer in peers {
            if let Err(err) = self.sync_peer(&peer.base_url).await {
                warn!(peer = %peer.base_url, error = %err, "peer sync failed, continuing with others");
            }
        }
    }

    /// Registers a new peer dynamically, as opposed to one seeded at
    /// startup from configuration.
    #[instrument(skip(self), level = "debug")]
    pub async fn add_peer(&self, base_url: &str) -> Result<(), StoreError> {
        self.database.put_peer(base_url).await?;
        Ok(())
    }
}
