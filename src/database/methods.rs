use axum::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Acquire, Executor, Postgres, Row};
use tracing::instrument;

use crate::database::types::{
    AnchorErrorKind, AnchorRecord, AnchorStatus, BatchRecord, Chain, ContinuityClaimRecord,
    CredentialRecord, IdentityRecord, PeerRecord, ProofRecord, ReputationRecord,
};
use crate::database::Error;

/// Store operations, expressed as an extension trait over anything that can
/// `Acquire` a Postgres connection. This lets every method run either
/// directly against the pool or inside an open transaction without
/// duplicating the query bodies.
#[async_trait]
pub trait DbMethods<'c>: Acquire<'c, Database = Postgres> + Sized + Send {
    #[instrument(skip(self, signature), level = "debug")]
    async fn put_proof(
        self,
        artifact_hash: &str,
        attestor_did: &str,
        signature: &str,
        claimed_timestamp: Option<DateTime<Utc>>,
        metadata: &JsonValue,
        source_registry: Option<&str>,
    ) -> Result<ProofRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO proofs (artifact_hash, attestor_did, signature, claimed_timestamp, metadata, source_registry)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, artifact_hash, attestor_did, signature, server_timestamp,
                      claimed_timestamp, metadata, batch_id, source_registry
            "#,
        )
        .bind(artifact_hash)
        .bind(attestor_did)
        .bind(signature)
        .bind(claimed_timestamp)
        .bind(metadata)
        .bind(source_registry)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(proof_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_proof_by_hash(self, artifact_hash: &str) -> Result<Option<ProofRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, artifact_hash, attestor_did, signature, server_timestamp,
                   claimed_timestamp, metadata, batch_id, source_registry
            FROM proofs
            WHERE artifact_hash = $1
            "#,
        )
        .bind(artifact_hash)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(proof_from_row))
    }

    /// Every unbatched proof, ordered by `(server_timestamp, hash)` to match
    /// the canonical leaf ordering used when building the Merkle tree.
    #[instrument(skip(self), level = "debug")]
    async fn list_pending_proofs(self, limit: i64) -> Result<Vec<ProofRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, artifact_hash, attestor_did, signature, server_timestamp,
                   claimed_timestamp, metadata, batch_id, source_registry
            FROM proofs
            WHERE batch_id IS NULL
            ORDER BY server_timestamp ASC, artifact_hash ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(proof_from_row).collect())
    }

    /// Returns every proof sealed into `batch_id`, in the same canonical
    /// `(server_timestamp, hash)` order used to build its Merkle tree, so
    /// callers can rebuild the tree and locate a leaf's index by position.
    #[instrument(skip(self), level = "debug")]
    async fn list_proofs_by_batch(self, batch_id: i64) -> Result<Vec<ProofRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, artifact_hash, attestor_did, signature, server_timestamp,
                   claimed_timestamp, metadata, batch_id, source_registry
            FROM proofs
            WHERE batch_id = $1
            ORDER BY server_timestamp ASC, artifact_hash ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(proof_from_row).collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn count_pending_proofs(self) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT count(*) FROM proofs WHERE batch_id IS NULL")
            .fetch_one(&mut *conn)
            .await?;

        Ok(row.get(0))
    }

    #[instrument(skip(self, proof_ids), level = "debug")]
    async fn mark_proofs_batched(self, proof_ids: &[i64], batch_id: i64) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        conn.execute(
            sqlx::query("UPDATE proofs SET batch_id = $2 WHERE id = ANY($1) AND batch_id IS NULL")
                .bind(proof_ids)
                .bind(batch_id),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn put_batch(
        self,
        root: &str,
        leaf_count: i32,
        source_registry: Option<&str>,
    ) -> Result<BatchRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO batches (root, leaf_count, source_registry) VALUES ($1, $2, $3)
            RETURNING id, root, leaf_count, sealed_at, source_registry
            "#,
        )
        .bind(root)
        .bind(leaf_count)
        .bind(source_registry)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(batch_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_batch(self, batch_id: i64) -> Result<Option<BatchRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT id, root, leaf_count, sealed_at, source_registry FROM batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(batch_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_batch_by_root(self, root: &str) -> Result<Option<BatchRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT id, root, leaf_count, sealed_at, source_registry FROM batches WHERE root = $1",
        )
        .bind(root)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(batch_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_latest_batch(self) -> Result<Option<BatchRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT id, root, leaf_count, sealed_at, source_registry FROM batches ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(batch_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn put_anchor(self, batch_id: i64, chain: Chain) -> Result<AnchorRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO anchors (batch_id, chain, status)
            VALUES ($1, $2, $3)
            RETURNING id, batch_id, chain, tx_id, status, confirmations,
                      error_kind, error_message, submitted_at, confirmed_at
            "#,
        )
        .bind(batch_id)
        .bind(chain.to_string())
        .bind(AnchorStatus::Pending.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(anchor_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_anchor_broadcast(self, anchor_id: i64, tx_id: &str) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        conn.execute(
            sqlx::query(
                "UPDATE anchors SET tx_id = $2, status = $3 WHERE id = $1",
            )
            .bind(anchor_id)
            .bind(tx_id)
            .bind(AnchorStatus::Broadcast.to_string()),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_anchor_failed(
        self,
        anchor_id: i64,
        kind: AnchorErrorKind,
        message: &str,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        conn.execute(
            sqlx::query(
                r#"
                UPDATE anchors
                SET status = $2, error_kind = $3, error_message = $4
                WHERE id = $1
                "#,
            )
            .bind(anchor_id)
            .bind(AnchorStatus::Failed.to_string())
            .bind(kind.to_string())
            .bind(message),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_anchor_confirmations(
        self,
        anchor_id: i64,
        confirmations: i32,
        confirmed: bool,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        let status = if confirmed {
            AnchorStatus::Confirmed
        } else {
            AnchorStatus::Broadcast
        };
        let confirmed_at_clause = if confirmed { "confirmed_at = now()," } else { "" };

        conn.execute(
            sqlx::query(&format!(
                "UPDATE anchors SET confirmations = $2, {confirmed_at_clause} status = $3 WHERE id = $1"
            ))
            .bind(anchor_id)
            .bind(confirmations)
            .bind(status.to_string()),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_anchors_for_batch(self, batch_id: i64) -> Result<Vec<AnchorRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, chain, tx_id, status, confirmations,
                   error_kind, error_message, submitted_at, confirmed_at
            FROM anchors
            WHERE batch_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(anchor_from_row).collect())
    }

    /// Sealed batches that have never had an anchor row created for `chain`,
    /// oldest first, so the anchoring task works through a backlog in order.
    #[instrument(skip(self), level = "debug")]
    async fn list_unanchored_batches(self, chain: Chain, limit: i64) -> Result<Vec<BatchRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT b.id, b.root, b.leaf_count, b.sealed_at, b.source_registry
            FROM batches b
            WHERE NOT EXISTS (
                SELECT 1 FROM anchors a WHERE a.batch_id = b.id AND a.chain = $1
            )
            ORDER BY b.id ASC
            LIMIT $2
            "#,
        )
        .bind(chain.to_string())
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(batch_from_row).collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_unconfirmed_anchors(self) -> Result<Vec<AnchorRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, chain, tx_id, status, confirmations,
                   error_kind, error_message, submitted_at, confirmed_at
            FROM anchors
            WHERE status = 'broadcast'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(anchor_from_row).collect())
    }

    #[instrument(skip(self, public_key_pem), level = "debug")]
    async fn put_identity(
        self,
        did: &str,
        public_key_pem: &str,
        parent_did: Option<&str>,
    ) -> Result<IdentityRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO identities (did, public_key_pem, parent_did)
            VALUES ($1, $2, $3)
            RETURNING did, public_key_pem, parent_did, rotation_seq, status, created_at
            "#,
        )
        .bind(did)
        .bind(public_key_pem)
        .bind(parent_did)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(identity_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_identity(self, did: &str) -> Result<Option<IdentityRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT did, public_key_pem, parent_did, rotation_seq, status, created_at FROM identities WHERE did = $1",
        )
        .bind(did)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(identity_from_row))
    }

    /// The identity that this one rotated into, if any. Since only one
    /// identity may be active per chain, a parent has at most one child.
    #[instrument(skip(self), level = "debug")]
    async fn get_child_identity(self, parent_did: &str) -> Result<Option<IdentityRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT did, public_key_pem, parent_did, rotation_seq, status, created_at FROM identities WHERE parent_did = $1",
        )
        .bind(parent_did)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(identity_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_identity_rotated(self, did: &str) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        let result = conn
            .execute(sqlx::query("UPDATE identities SET status = 'rotated' WHERE did = $1").bind(did))
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_continuity_chain(self, did: &str) -> Result<Vec<ContinuityClaimRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, did, old_public_key_pem, new_public_key_pem,
                   old_key_signature, new_key_signature, rotated_at
            FROM continuity_claims
            WHERE did = $1
            ORDER BY id ASC
            "#,
        )
        .bind(did)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(continuity_claim_from_row).collect())
    }

    #[instrument(skip(self, old_public_key_pem, new_public_key_pem), level = "debug")]
    async fn put_continuity_claim(
        self,
        did: &str,
        old_public_key_pem: &str,
        new_public_key_pem: &str,
        old_key_signature: &str,
        new_key_signature: &str,
    ) -> Result<ContinuityClaimRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO continuity_claims
                (did, old_public_key_pem, new_public_key_pem, old_key_signature, new_key_signature)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, did, old_public_key_pem, new_public_key_pem,
                      old_key_signature, new_key_signature, rotated_at
            "#,
        )
        .bind(did)
        .bind(old_public_key_pem)
        .bind(new_public_key_pem)
        .bind(old_key_signature)
        .bind(new_key_signature)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(continuity_claim_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn put_credential(
        self,
        hash: &str,
        subject_did: &str,
        issuer_did: &str,
        credential_type: &str,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO credentials (hash, subject_did, issuer_did, credential_type, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING hash, subject_did, issuer_did, credential_type, issued_at, expires_at, revoked_at
            "#,
        )
        .bind(hash)
        .bind(subject_did)
        .bind(issuer_did)
        .bind(credential_type)
        .bind(issued_at)
        .bind(expires_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(credential_from_row(&row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn revoke_credential(self, hash: &str) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        let result = conn
            .execute(sqlx::query("UPDATE credentials SET revoked_at = now() WHERE hash = $1 AND revoked_at IS NULL").bind(hash))
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_credential(self, hash: &str) -> Result<Option<CredentialRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT hash, subject_did, issuer_did, credential_type, issued_at, expires_at, revoked_at \
             FROM credentials WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(credential_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_credentials_for_subject(self, subject_did: &str) -> Result<Vec<CredentialRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            "SELECT hash, subject_did, issuer_did, credential_type, issued_at, expires_at, revoked_at \
             FROM credentials WHERE subject_did = $1 ORDER BY issued_at ASC",
        )
        .bind(subject_did)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(credential_from_row).collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn put_reputation(self, did: &str, score: i16) -> Result<ReputationRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO reputations (did, score) VALUES ($1, $2)
            ON CONFLICT (did) DO UPDATE SET score = excluded.score, updated_at = now()
            RETURNING score, updated_at
            "#,
        )
        .bind(did)
        .bind(score)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from_sqlx)?;

        Ok(ReputationRecord {
            score:      row.get(0),
            updated_at: row.get(1),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_reputation(self, did: &str) -> Result<Option<ReputationRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT score, updated_at FROM reputations WHERE did = $1")
            .bind(did)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|row| ReputationRecord {
            score:      row.get(0),
            updated_at: row.get(1),
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn put_peer(self, base_url: &str) -> Result<PeerRecord, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO peers (base_url) VALUES ($1)
            ON CONFLICT (base_url) DO NOTHING
            RETURNING base_url, last_synced_root, last_synced_at
            "#,
        )
        .bind(base_url)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(peer_from_row(&row)),
            None => self.get_peer(base_url).await?.ok_or(Error::NotFound),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_peer(self, base_url: &str) -> Result<Option<PeerRecord>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            "SELECT base_url, last_synced_root, last_synced_at FROM peers WHERE base_url = $1",
        )
        .bind(base_url)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.as_ref().map(peer_from_row))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_peers(self) -> Result<Vec<PeerRecord>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query("SELECT base_url, last_synced_root, last_synced_at FROM peers")
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows.iter().map(peer_from_row).collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_peer_synced(self, base_url: &str, root: &str) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        conn.execute(
            sqlx::query(
                "UPDATE peers SET last_synced_root = $2, last_synced_at = now() WHERE base_url = $1",
            )
            .bind(base_url)
            .bind(root),
        )
        .await?;

        Ok(())
    }
}

impl<'c, T> DbMethods<'c> for T where T: Acquire<'c, Database = Postgres> + Sized + Send {}

fn proof_from_row(row: &sqlx::postgres::PgRow) -> ProofRecord {
    ProofRecord {
        id:                row.get(0),
        artifact_hash:     row.get(1),
        attestor_did:      row.get(2),
        signature:         row.get(3),
        server_timestamp:  row.get(4),
        claimed_timestamp: row.get(5),
        metadata:          row.get(6),
        batch_id:          row.get(7),
        source_registry:   row.get(8),
    }
}

fn batch_from_row(row: &sqlx::postgres::PgRow) -> BatchRecord {
    BatchRecord {
        id:               row.get(0),
        root:             row.get(1),
        leaf_count:       row.get(2),
        sealed_at:        row.get(3),
        source_registry:  row.get(4),
    }
}

fn anchor_from_row(row: &sqlx::postgres::PgRow) -> AnchorRecord {
    let chain: String = row.get(2);
    let status: String = row.get(4);
    let error_kind: Option<String> = row.get(6);

    AnchorRecord {
        id:            row.get(0),
        batch_id:      row.get(1),
        chain:         chain.parse().expect("chain column is corrupt"),
        tx_id:         row.get(3),
        status:        status.parse().expect("anchor status column is corrupt"),
        confirmations: row.get(5),
        error_kind:    error_kind.map(|s| s.parse().unwrap_or(AnchorErrorKind::Unknown)),
        error_message: row.get(7),
        submitted_at:  row.get(8),
        confirmed_at:  row.get(9),
    }
}

fn identity_from_row(row: &sqlx::postgres::PgRow) -> IdentityRecord {
    IdentityRecord {
        did:            row.get(0),
        public_key_pem: row.get(1),
        parent_did:     row.get(2),
        rotation_seq:   row.get(3),
        status:         row.get(4),
        created_at:     row.get(5),
    }
}

fn continuity_claim_from_row(row: &sqlx::postgres::PgRow) -> ContinuityClaimRecord {
    ContinuityClaimRecord {
        id:                 row.get(0),
        did:                row.get(1),
        old_public_key_pem: row.get(2),
        new_public_key_pem: row.get(3),
        old_key_signature:  row.get(4),
        new_key_signature:  row.get(5),
        rotated_at:         row.get(6),
    }
}

fn credential_from_row(row: &sqlx::postgres::PgRow) -> CredentialRecord {
    CredentialRecord {
        hash:            row.get(0),
        subject_did:     row.get(1),
        issuer_did:      row.get(2),
        credential_type: row.get(3),
        issued_at:       row.get(4),
        expires_at:      row.get(5),
        revoked_at:      row.get(6),
    }
}

fn peer_from_row(row: &sqlx::postgres::PgRow) -> PeerRecord {
    PeerRecord {
        base_url:         row.get(0),
        last_synced_root: row.get(1),
        last_synced_at:   row.get(2),
    }
}
