//! Deterministic Merkle batch construction and inclusion proofs.
//!
//! Leaves are ordered by `(server_timestamp, hash)` so that two nodes given
//! the same set of proofs always build the same tree, regardless of the
//! order proofs arrived in. Pairwise SHA-256 hashing with odd-node
//! duplication, matching the scheme used by evidence-anchoring batchers
//! elsewhere in this space.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::database::methods::DbMethods as _;
use crate::database::types::{BatchRecord, ProofRecord};
use crate::database::{Database, Error as StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub hash:             [u8; 32],
    pub server_timestamp: DateTime<Utc>,
}

impl From<&ProofRecord> for Leaf {
    fn from(proof: &ProofRecord) -> Self {
        Self {
            hash:             proof_hash_bytes(&proof.artifact_hash),
            server_timestamp: proof.server_timestamp,
        }
    }
}

/// A sibling hash and which side it sits on, read leaf-to-root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: [u8; 32],
    pub is_left: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub leaf_hash:  [u8; 32],
    pub steps:      Vec<ProofStep>,
    pub root:       [u8; 32],
}

impl InclusionProof {
    /// Recomputes the root by folding the proof steps over the leaf hash and
    /// compares it against the expected root. Used both by the verify
    /// endpoint and by tests.
    #[must_use]
    pub fn verify(&self, expected_root: &[u8; 32]) -> bool {
        let mut current = self.leaf_hash;

        for step in &self.steps {
            current = if step.is_left {
                hash_pair(&step.sibling, &current)
            } else {
                hash_pair(&current, &step.sibling)
            };
        }

        &current == expected_root
    }
}

/// A sealed Merkle tree over a canonically-ordered leaf set.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Builds a tree from leaves, sorting them by `(server_timestamp, hash)`
    /// first so batch construction is order-independent.
    ///
    /// # Panics
    /// Panics if `leaves` is empty — callers must not attempt to seal an
    /// empty batch.
    #[must_use]
    pub fn build(mut leaves: Vec<Leaf>) -> Self {
        assert!(!leaves.is_empty(), "cannot build a Merkle tree with zero leaves");

        leaves.sort_by(|a, b| (a.server_timestamp, a.hash).cmp(&(b.server_timestamp, b.hash)));
        let leaves: Vec<[u8; 32]> = leaves.into_iter().map(|l| l.hash).collect();

        let mut levels = vec![leaves.clone()];
        let mut current = leaves.clone();

        // A single-leaf batch still runs one duplication round, per the
        // odd-count rule applied to a level of size one: root = H(leaf||leaf),
        // never the bare leaf hash.
        while current.len() > 1 || levels.len() == 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(hash_pair(&pair[0], right));
            }

            levels.push(next.clone());
            current = next;
        }

        Self { leaves, levels }
    }

    #[must_use]
    pub fn root(&self) -> [u8; 32] {
        self.levels.last().expect("at least one level")[0]
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Finds a leaf's position in the canonical `(server_timestamp, hash)`
    /// order `build` sorted into, given its hash. Callers must look up the
    /// index this way rather than by any externally-tracked position (e.g.
    /// SQL row order), since that order need not agree with the tree's once
    /// two leaves share a `server_timestamp`.
    #[must_use]
    pub fn leaf_index(&self, hash: &[u8; 32]) -> Option<usize> {
        self.leaves.iter().position(|l| l == hash)
    }

    /// Generates an inclusion proof for the leaf at `index`, or `None` if
    /// out of range.
    #[must_use]
    pub fn proof(&self, index: usize) -> Option<InclusionProof> {
        if index >= self.leaves.len() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len() - 1);
        let mut current_index = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let is_right_child = current_index % 2 == 1;
            let sibling_index = if is_right_child {
                current_index - 1
            } else {
                current_index + 1
            };

            let sibling = *level.get(sibling_index).unwrap_or(&level[current_index]);
            steps.push(ProofStep {
                sibling,
                is_left: is_right_child,
            });

            current_index /= 2;
        }

        Some(InclusionProof {
            leaf_index: index,
            leaf_hash:  self.leaves[index],
            steps,
            root:       self.root(),
        })
    }
}

/// Seals a batch if there are at least `min_size` pending proofs, or if
/// `force` is set (the manual `seal_now()` trigger). Builds the tree,
/// persists the batch and marks its proofs batched inside one transaction,
/// and returns the sealed batch plus the tree it was sealed with (so the
/// caller can hand out inclusion proofs without rebuilding it).
///
/// Idle when there is nothing pending: returns `Ok(None)`.
#[instrument(skip(database), level = "debug")]
pub async fn seal_pending_batch(
    database: &Database,
    min_size: usize,
    force: bool,
) -> Result<Option<(BatchRecord, MerkleTree)>, StoreError> {
    let pending_count = database.count_pending_proofs().await?;
    if pending_count == 0 || (!force && (pending_count as usize) < min_size) {
        return Ok(None);
    }

    let pending = database.list_pending_proofs(pending_count).await?;
    let proof_ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
    let leaves: Vec<Leaf> = pending.iter().map(Leaf::from).collect();

    let tree = MerkleTree::build(leaves);
    let root = hex::encode(tree.root());

    let batch = database.seal_batch(&root, &proof_ids).await?;

    Ok(Some((batch, tree)))
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Decodes a proof's `0x`-prefixed hex content hash into the raw 32 bytes
/// that serve as its leaf. Falls back to re-hashing the string itself for
/// an unparseable value (only reachable for a malformed peer-imported
/// record, never a locally-attested one) so batching stays infallible and
/// still deterministic.
#[must_use]
pub fn proof_hash_bytes(artifact_hash: &str) -> [u8; 32] {
    let hex_part = artifact_hash.strip_prefix("0x").unwrap_or(artifact_hash);
    match hex::decode(hex_part) {
        Ok(bytes) if bytes.len() == 32 => bytes.try_into().expect("length checked above"),
        _ => Sha256::digest(artifact_hash.as_bytes()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(ts: i64, byte: u8) -> Leaf {
        Leaf {
            hash:             [byte; 32],
            server_timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
        }
    }

    #[test]
    fn single_leaf_tree_duplicates_to_build_root() {
        let tree = MerkleTree::build(vec![leaf(1, 7)]);
        assert_eq!(tree.root(), hash_pair(&[7; 32], &[7; 32]));

        let proof = tree.proof(0).unwrap();
        assert_eq!(proof.steps.len(), 1);
        assert_eq!(proof.steps[0].sibling, [7; 32]);
        assert!(proof.verify(&tree.root()));
    }

    #[test]
    fn odd_leaf_count_duplicates_last_leaf() {
        let tree = MerkleTree::build(vec![leaf(1, 1), leaf(2, 2), leaf(3, 3)]);
        let proof = tree.proof(2).unwrap();
        assert!(proof.verify(&tree.root()));
    }

    #[test]
    fn every_leaf_has_a_valid_inclusion_proof() {
        let leaves: Vec<Leaf> = (0..7).map(|i| leaf(i, i as u8)).collect();
        let tree = MerkleTree::build(leaves);

        for i in 0..tree.leaf_count() {
            let proof = tree.proof(i).unwrap();
            assert!(proof.verify(&tree.root()), "proof {i} failed to verify");
        }
    }

    #[test]
    fn ordering_is_independent_of_insertion_order() {
        let forward = vec![leaf(1, 1), leaf(2, 2), leaf(3, 3), leaf(4, 4)];
        let backward = vec![leaf(4, 4), leaf(2, 2), leaf(1, 1), leaf(3, 3)];

        let root_a = MerkleTree::build(forward).root();
        let root_b = MerkleTree::build(backward).root();
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn tampered_proof_fails_verification() {
        let leaves: Vec<Leaf> = (0..4).map(|i| leaf(i, i as u8)).collect();
        let tree = MerkleTree::build(leaves);
        let mut proof = tree.proof(1).unwrap();
        proof.steps[0].sibling = [0xFF; 32];

        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn leaf_index_is_found_by_hash_not_insertion_position() {
        let leaves = vec![leaf(5, 9), leaf(1, 1), leaf(3, 4)];
        let tree = MerkleTree::build(leaves);

        assert_eq!(tree.leaf_index(&[1; 32]), Some(0));
        assert_eq!(tree.leaf_index(&[4; 32]), Some(1));
        assert_eq!(tree.leaf_index(&[9; 32]), Some(2));
        assert_eq!(tree.leaf_index(&[0xAB; 32]), None);
    }

    #[test]
    fn proof_hash_bytes_decodes_canonical_hex() {
        let hash = "0x".to_owned() + &"ab".repeat(32);
        assert_eq!(proof_hash_bytes(&hash), [0xAB; 32]);
    }
}
