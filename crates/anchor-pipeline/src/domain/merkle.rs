//! Merkle tree construction and proofs
//!
//! A binary hash tree over an ordered list of leaf hashes. When a level has
//! an odd number of elements the last element is duplicated before pairing,
//! so a three-leaf tree resolves as H(H(L0||L1) || H(L2||L2)). Node hashes
//! combine as concatenated hex text (see `hashing::hash_pair`).
//!
//! Every original leaf gets a full proof path: one sibling hash per level,
//! tagged with the side the sibling sits on. Replaying the path from the
//! leaf reproduces the root.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::hashing::hash_pair;

/// Side of the sibling hash at one proof step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

/// Proof path for one leaf: sibling hashes from leaf level upward, with
/// their positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub proof_path: Vec<String>,
    pub sibling_positions: Vec<SiblingPosition>,
}

/// An immutable Merkle tree with per-leaf proofs.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    /// Number of original leaves, before any duplication.
    leaf_count: usize,
    /// All levels bottom-up, each padded to even length where pairing
    /// required it. `levels[0]` starts with the original leaves.
    levels: Vec<Vec<String>>,
    root: String,
    proofs: BTreeMap<usize, MerkleProof>,
}

impl MerkleTree {
    /// Build a tree from at least one leaf hash.
    ///
    /// Returns `None` for an empty input; an empty batch has nothing to
    /// anchor and never reaches this point.
    pub fn build(leaf_hashes: Vec<String>) -> Option<Self> {
        if leaf_hashes.is_empty() {
            return None;
        }
        let leaf_count = leaf_hashes.len();

        let mut levels: Vec<Vec<String>> = vec![leaf_hashes];
        while levels[levels.len() - 1].len() > 1 {
            let top = levels.len() - 1;
            if levels[top].len() % 2 == 1 {
                let tail = levels[top][levels[top].len() - 1].clone();
                levels[top].push(tail);
            }
            let next: Vec<String> = levels[top]
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }

        let root = levels[levels.len() - 1][0].clone();
        let proofs = Self::build_proofs(&levels, leaf_count);

        Some(Self {
            leaf_count,
            levels,
            root,
            proofs,
        })
    }

    fn build_proofs(levels: &[Vec<String>], leaf_count: usize) -> BTreeMap<usize, MerkleProof> {
        let height = levels.len() - 1;
        let mut proofs = BTreeMap::new();

        for leaf in 0..leaf_count {
            let mut proof_path = Vec::with_capacity(height);
            let mut sibling_positions = Vec::with_capacity(height);
            let mut index = leaf;

            for level in &levels[..height] {
                let sibling = index ^ 1;
                proof_path.push(level[sibling].clone());
                sibling_positions.push(if index % 2 == 0 {
                    SiblingPosition::Right
                } else {
                    SiblingPosition::Left
                });
                index /= 2;
            }

            proofs.insert(
                leaf,
                MerkleProof {
                    leaf_index: leaf,
                    proof_path,
                    sibling_positions,
                },
            );
        }

        proofs
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of levels above the leaves; a single-leaf tree has height 0.
    pub fn height(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// All node levels bottom-up, including any duplicated tail elements.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn proof(&self, leaf_index: usize) -> Option<&MerkleProof> {
        self.proofs.get(&leaf_index)
    }

    pub fn proofs(&self) -> &BTreeMap<usize, MerkleProof> {
        &self.proofs
    }

    /// Replay a proof against a leaf hash. At each step the sibling is
    /// prepended when it sits on the left, appended when on the right, and
    /// the pair is rehashed.
    pub fn verify_proof(leaf_hash: &str, proof: &MerkleProof, expected_root: &str) -> bool {
        let mut current = leaf_hash.to_string();
        for (sibling, position) in proof.proof_path.iter().zip(&proof.sibling_positions) {
            current = match position {
                SiblingPosition::Left => hash_pair(sibling, &current),
                SiblingPosition::Right => hash_pair(&current, sibling),
            };
        }
        current == expected_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::hashing::sha256_hex;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| sha256_hex(format!("leaf-{i}").as_bytes())).collect()
    }

    #[test]
    fn test_single_leaf_tree() {
        let hashes = leaves(1);
        let tree = MerkleTree::build(hashes.clone()).unwrap();

        assert_eq!(tree.height(), 0);
        assert_eq!(tree.root(), hashes[0]);

        let proof = tree.proof(0).unwrap();
        assert!(proof.proof_path.is_empty());
        assert!(MerkleTree::verify_proof(&hashes[0], proof, tree.root()));
    }

    #[test]
    fn test_two_leaf_tree() {
        let hashes = leaves(2);
        let tree = MerkleTree::build(hashes.clone()).unwrap();

        assert_eq!(tree.height(), 1);
        assert_eq!(tree.root(), hash_pair(&hashes[0], &hashes[1]));
    }

    #[test]
    fn test_three_leaf_tree_duplicates_tail() {
        let hashes = leaves(3);
        let tree = MerkleTree::build(hashes.clone()).unwrap();

        let expected = hash_pair(
            &hash_pair(&hashes[0], &hashes[1]),
            &hash_pair(&hashes[2], &hashes[2]),
        );
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.height(), 2);

        // Only original leaves carry proofs.
        assert_eq!(tree.proofs().len(), 3);
        assert!(tree.proof(3).is_none());
    }

    #[test]
    fn test_all_proofs_verify() {
        for n in [1usize, 2, 3, 4, 5, 7, 8, 13] {
            let hashes = leaves(n);
            let tree = MerkleTree::build(hashes.clone()).unwrap();
            for (i, leaf) in hashes.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.proof_path.len(), tree.height());
                assert!(
                    MerkleTree::verify_proof(leaf, proof, tree.root()),
                    "proof for leaf {i} of {n} failed"
                );
            }
        }
    }

    #[test]
    fn test_thousand_leaf_tree_height() {
        let hashes = leaves(1000);
        let tree = MerkleTree::build(hashes).unwrap();
        assert_eq!(tree.height(), 10);
        assert_eq!(tree.proof(999).unwrap().proof_path.len(), 10);
    }

    #[test]
    fn test_tampered_leaf_rejected() {
        let hashes = leaves(4);
        let tree = MerkleTree::build(hashes.clone()).unwrap();
        let proof = tree.proof(2).unwrap();

        let tampered = sha256_hex(b"someone else's leaf");
        assert!(!MerkleTree::verify_proof(&tampered, proof, tree.root()));
    }

    #[test]
    fn test_tampered_path_rejected() {
        let hashes = leaves(4);
        let tree = MerkleTree::build(hashes.clone()).unwrap();
        let mut proof = tree.proof(1).unwrap().clone();
        proof.proof_path[0] = sha256_hex(b"forged sibling");

        assert!(!MerkleTree::verify_proof(&hashes[1], &proof, tree.root()));
    }

    #[test]
    fn test_deterministic_roots() {
        let tree_a = MerkleTree::build(leaves(6)).unwrap();
        let tree_b = MerkleTree::build(leaves(6)).unwrap();
        assert_eq!(tree_a.root(), tree_b.root());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(MerkleTree::build(Vec::new()).is_none());
    }
}
