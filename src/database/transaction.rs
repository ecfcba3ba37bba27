use chrono::Utc;
use tracing::instrument;

use crate::database::methods::DbMethods;
use crate::database::types::{AnchorRecord, BatchRecord, Chain};
use crate::database::{Database, Error};

/// A proof as carried in a peer's batch manifest during federation sync.
pub struct ForeignProof {
    pub artifact_hash: String,
    pub attestor_did:  String,
    pub signature:     String,
}

/// Composite operations that must run inside a single serializable
/// transaction because they touch more than one table and need to observe a
/// consistent snapshot of `proofs`.
impl Database {
    /// Atomically seals a batch: records the Merkle root and leaf count, then
    /// stamps every proof that went into it with the new `batch_id`. Runs
    /// under `SERIALIZABLE` isolation (set at connection time) so a
    /// concurrent `list_pending_proofs` call can't see a half-sealed batch.
    #[instrument(skip(self, proof_ids), level = "debug")]
    pub async fn seal_batch(
        &self,
        root: &str,
        proof_ids: &[i64],
    ) -> Result<BatchRecord, Error> {
        let mut tx = self.pool.begin().await?;

        let batch = (&mut *tx).put_batch(root, proof_ids.len() as i32, None).await?;
        (&mut *tx).mark_proofs_batched(proof_ids, batch.id).await?;

        tx.commit().await?;

        Ok(batch)
    }

    /// Persists a batch pulled from a peer during federation sync, tagging
    /// both the batch and any proofs it doesn't already have with
    /// `source_registry`, and links the new proofs to it directly rather
    /// than leaving them pending — otherwise they'd be swept into a
    /// fresh, locally-rooted batch the next time this node seals one,
    /// and the peer's root could never be reproduced locally. A proof
    /// already known under a different (or no) batch is left untouched:
    /// conflicts never overwrite local records.
    ///
    /// If `root` already exists locally — pulled in an earlier sync
    /// round, or reported by another peer — returns that batch as-is and
    /// imports nothing, since `batches.root` is unique.
    #[instrument(skip(self, proofs), level = "debug")]
    pub async fn import_foreign_batch(
        &self,
        peer_base_url: &str,
        root: &str,
        proofs: &[ForeignProof],
    ) -> Result<BatchRecord, Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = (&mut *tx).get_batch_by_root(root).await? {
            tx.commit().await?;
            return Ok(existing);
        }

        let batch = (&mut *tx)
            .put_batch(root, proofs.len() as i32, Some(peer_base_url))
            .await?;

        for proof in proofs {
            if (&mut *tx).get_proof_by_hash(&proof.artifact_hash).await?.is_some() {
                continue;
            }

            let inserted = (&mut *tx)
                .put_proof(
                    &proof.artifact_hash,
                    &proof.attestor_did,
                    &proof.signature,
                    Some(Utc::now()),
                    &serde_json::Value::Null,
                    Some(peer_base_url),
                )
                .await?;

            (&mut *tx).mark_proofs_batched(&[inserted.id], batch.id).await?;
        }

        tx.commit().await?;

        Ok(batch)
    }

    /// Registers a fresh anchoring attempt for a batch on the given chain.
    /// Separate from `seal_batch` because anchoring happens asynchronously,
    /// potentially much later and on more than one chain.
    #[instrument(skip(self), level = "debug")]
    pub async fn open_anchor(&self, batch_id: i64, chain: Chain) -> Result<AnchorRecord, Error> {
        let mut tx = self.pool.begin().await?;

        let anchor = (&mut *tx).put_anchor(batch_id, chain).await?;

        tx.commit().await?;

        Ok(anchor)
    }

    /// Rotates an identity's signing key: the old identity keeps its row
    /// (self-certifying, so its `did` can never point at a different key)
    /// and moves to `rotated`; a brand-new identity row is inserted for
    /// `new_did`, parented on the old one, holding the new key and starting
    /// `active`. The bilaterally-signed continuity claim is recorded against
    /// the new identity — "the claim that justifies this did's validity" —
    /// all in one transaction so the chain link and the new head can never
    /// disagree.
    #[instrument(skip(self, new_public_key_pem, old_key_signature, new_key_signature), level = "debug")]
    pub async fn rotate_identity_key(
        &self,
        old_did: &str,
        new_did: &str,
        new_public_key_pem: &str,
        old_key_signature: &str,
        new_key_signature: &str,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let current = (&mut *tx).get_identity(old_did).await?.ok_or(Error::NotFound)?;

        (&mut *tx)
            .put_identity(new_did, new_public_key_pem, Some(old_did))
            .await?;

        (&mut *tx).mark_identity_rotated(old_did).await?;

        (&mut *tx)
            .put_continuity_claim(
                new_did,
                &current.public_key_pem,
                new_public_key_pem,
                old_key_signature,
                new_key_signature,
            )
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
