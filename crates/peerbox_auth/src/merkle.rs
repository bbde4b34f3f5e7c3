//! Merkle membership set.
//!
//! A content-addressed set of fingerprint leaves with compact inclusion
//! proofs. There is no native leaf removal: removing a member rebuilds the
//! tree from the reduced leaf set. Membership changes are rare relative to
//! lookups, so the O(n) rebuild is the simpler and safer trade.

use crate::keys::Fingerprint;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A 32-byte tree node hash.
pub type NodeHash = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Ordered collection of fingerprint leaves with Merkle hashing.
///
/// The root hash is a deterministic function of the leaf sequence. Internal
/// tree shape depends on insertion order, so callers compare membership and
/// proof outcomes rather than raw roots across differently-built sets.
#[derive(Debug, Clone, Default)]
pub struct MembershipSet {
    leaves: Vec<Fingerprint>,
    present: HashSet<Fingerprint>,
}

impl MembershipSet {
    /// Creates an empty membership set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from an initial leaf sequence, dropping duplicates.
    pub fn from_leaves(leaves: impl IntoIterator<Item = Fingerprint>) -> Self {
        let mut set = Self::new();
        for leaf in leaves {
            set.add(leaf);
        }
        set
    }

    /// Inserts a leaf. Returns false if it was already present.
    pub fn add(&mut self, leaf: Fingerprint) -> bool {
        if self.present.contains(&leaf) {
            return false;
        }
        self.present.insert(leaf.clone());
        self.leaves.push(leaf);
        true
    }

    /// Removes a leaf by rebuilding the tree from the reduced leaf set.
    ///
    /// Returns false if the leaf was not present.
    pub fn remove(&mut self, leaf: &Fingerprint) -> bool {
        if !self.present.contains(leaf) {
            return false;
        }
        let remaining: Vec<Fingerprint> =
            self.leaves.iter().filter(|l| *l != leaf).cloned().collect();
        self.leaves.clear();
        self.present.clear();
        for l in remaining {
            self.add(l);
        }
        true
    }

    /// Returns true if the leaf is currently a member.
    pub fn contains(&self, leaf: &Fingerprint) -> bool {
        self.present.contains(leaf)
    }

    /// Returns the number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Returns true if the set has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Iterates the leaves in insertion order.
    pub fn leaves(&self) -> impl Iterator<Item = &Fingerprint> {
        self.leaves.iter()
    }

    /// Returns the root hash, or `None` for an empty set.
    pub fn root(&self) -> Option<NodeHash> {
        self.levels().last().map(|top| top[0])
    }

    /// Produces an inclusion proof for a leaf, or `None` if absent.
    pub fn prove(&self, leaf: &Fingerprint) -> Option<MembershipProof> {
        let mut index = self.leaves.iter().position(|l| l == leaf)?;
        let levels = self.levels();

        let mut siblings = Vec::new();
        for level in &levels[..levels.len() - 1] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            // Odd level width duplicates the last node as its own sibling.
            let sibling = level
                .get(sibling_index)
                .copied()
                .unwrap_or(level[index]);
            siblings.push(ProofNode {
                hash: sibling,
                on_left: index % 2 == 1,
            });
            index /= 2;
        }

        Some(MembershipProof { siblings })
    }

    /// Computes all tree levels bottom-up. Empty for an empty set.
    fn levels(&self) -> Vec<Vec<NodeHash>> {
        if self.leaves.is_empty() {
            return Vec::new();
        }

        let mut levels = vec![self
            .leaves
            .iter()
            .map(hash_leaf)
            .collect::<Vec<NodeHash>>()];

        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let below = levels.last().expect("non-empty by construction");
            let mut above = Vec::with_capacity(below.len().div_ceil(2));
            for pair in below.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                above.push(hash_node(&left, &right));
            }
            levels.push(above);
        }

        levels
    }
}

/// A path of sibling hashes from a leaf to the root.
///
/// A verifier holding only the root can confirm membership without seeing
/// the full member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipProof {
    siblings: Vec<ProofNode>,
}

/// One step of a proof path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProofNode {
    hash: NodeHash,
    on_left: bool,
}

impl MembershipProof {
    /// Verifies that `leaf` hashes up to `root` along this path.
    pub fn verify(&self, leaf: &Fingerprint, root: &NodeHash) -> bool {
        let mut current = hash_leaf(leaf);
        for sibling in &self.siblings {
            current = if sibling.on_left {
                hash_node(&sibling.hash, &current)
            } else {
                hash_node(&current, &sibling.hash)
            };
        }
        current == *root
    }

    /// Number of path steps (tree depth above the leaf).
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    /// Returns true for a single-leaf tree's empty path.
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }
}

fn hash_leaf(leaf: &Fingerprint) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(leaf.as_str().as_bytes());
    hasher.finalize().into()
}

fn hash_node(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_hex(s)
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = MembershipSet::new();
        assert!(set.add(fp("f1")));
        assert!(!set.add(fp("f1")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn contains_after_add() {
        let mut set = MembershipSet::new();
        set.add(fp("f1"));
        set.add(fp("f2"));

        assert!(set.contains(&fp("f1")));
        assert!(set.contains(&fp("f2")));
        assert!(!set.contains(&fp("f3")));
    }

    #[test]
    fn empty_set_has_no_root() {
        let set = MembershipSet::new();
        assert!(set.root().is_none());
        assert!(set.prove(&fp("f1")).is_none());
    }

    #[test]
    fn proofs_verify_for_every_member() {
        let mut set = MembershipSet::new();
        for i in 0..7 {
            set.add(fp(&format!("f{}", i)));
        }
        let root = set.root().unwrap();

        for leaf in set.leaves() {
            let proof = set.prove(leaf).unwrap();
            assert!(proof.verify(leaf, &root), "proof failed for {}", leaf);
        }
    }

    #[test]
    fn proof_fails_for_wrong_leaf() {
        let mut set = MembershipSet::new();
        set.add(fp("f1"));
        set.add(fp("f2"));
        set.add(fp("f3"));
        let root = set.root().unwrap();

        let proof = set.prove(&fp("f1")).unwrap();
        assert!(!proof.verify(&fp("f2"), &root));
        assert!(!proof.verify(&fp("absent"), &root));
    }

    #[test]
    fn proof_fails_against_wrong_root() {
        let mut set = MembershipSet::new();
        set.add(fp("f1"));
        set.add(fp("f2"));
        let proof = set.prove(&fp("f1")).unwrap();

        let mut other = MembershipSet::new();
        other.add(fp("f9"));
        other.add(fp("f8"));
        let wrong_root = other.root().unwrap();

        assert!(!proof.verify(&fp("f1"), &wrong_root));
    }

    #[test]
    fn single_leaf_has_empty_proof() {
        let mut set = MembershipSet::new();
        set.add(fp("only"));
        let root = set.root().unwrap();

        let proof = set.prove(&fp("only")).unwrap();
        assert!(proof.is_empty());
        assert!(proof.verify(&fp("only"), &root));
    }

    #[test]
    fn remove_rebuilds_the_tree() {
        let mut set = MembershipSet::new();
        set.add(fp("f1"));
        set.add(fp("f2"));
        set.add(fp("f3"));

        assert!(set.remove(&fp("f2")));
        assert!(!set.remove(&fp("f2")));
        assert!(!set.contains(&fp("f2")));
        assert_eq!(set.len(), 2);

        // Remaining members still prove against the rebuilt root.
        let root = set.root().unwrap();
        for leaf in [fp("f1"), fp("f3")] {
            assert!(set.prove(&leaf).unwrap().verify(&leaf, &root));
        }
    }

    #[test]
    fn remove_then_readd_matches_never_added() {
        let mut with_removal = MembershipSet::new();
        with_removal.add(fp("f1"));
        with_removal.add(fp("f2"));
        with_removal.add(fp("f3"));
        with_removal.remove(&fp("f2"));

        let mut never_added = MembershipSet::new();
        never_added.add(fp("f1"));
        never_added.add(fp("f3"));

        for leaf in ["f1", "f2", "f3", "f4"] {
            assert_eq!(
                with_removal.contains(&fp(leaf)),
                never_added.contains(&fp(leaf)),
                "membership diverged for {}",
                leaf
            );
        }
    }

    proptest! {
        #[test]
        fn membership_and_proofs_agree(leaves in proptest::collection::hash_set("[a-f0-9]{8}", 1..20)) {
            let leaves: Vec<Fingerprint> = leaves.into_iter().map(Fingerprint::from_hex).collect();
            let set = MembershipSet::from_leaves(leaves.clone());
            let root = set.root().unwrap();

            for leaf in &leaves {
                prop_assert!(set.contains(leaf));
                let proof = set.prove(leaf).unwrap();
                prop_assert!(proof.verify(leaf, &root));
            }

            let absent = Fingerprint::from_hex("zzzz-not-a-member");
            prop_assert!(!set.contains(&absent));
            prop_assert!(set.prove(&absent).is_none());
        }
    }
}
