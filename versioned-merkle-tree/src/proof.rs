use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::encoder::Encoder;
use crate::position::key_child_index_at_level;
use crate::{
    Config, Hash, KeyEncodedValuePair, KeyHashPair, KeySpecificSecret, KeyValuePair,
    MerkleTreeError, Node, RootMetadata,
};

/// Evidence that a record belongs to one version of a tree.
///
/// The proved value itself is not part of the proof, it is given to the verifier alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleInclusionProof {
    /// Secret the value commitment is keyed with, only for blinded trees
    pub key_specific_secret: Option<KeySpecificSecret>,

    /// The other records of the leaf holding the proved one, sorted by key
    pub other_pairs_in_leaf: Vec<KeyHashPair>,

    /// `children_per_node - 1` sibling hashes per level, from the leaf level up to the root
    pub sibling_hashes_on_path: Vec<Hash>,

    /// Root metadata of the version, its bare root hash left empty
    pub root_metadata_no_hash: RootMetadata,
}

/// Stateless checker of [MerkleInclusionProof]s.
#[derive(Debug, Clone)]
pub struct MerkleProofVerifier<E: Encoder> {
    config: Arc<Config<E>>,
}

impl<E: Encoder> MerkleProofVerifier<E> {
    /// MerkleProofVerifier factory
    pub fn new(config: Arc<Config<E>>) -> Self {
        Self { config }
    }

    /// Check that `pair` belongs to the version whose root hash is `expected_root_hash`.
    pub fn verify_inclusion_proof<V: Serialize>(
        &self,
        pair: &KeyValuePair<V>,
        proof: &MerkleInclusionProof,
        expected_root_hash: &Hash,
    ) -> Result<(), MerkleTreeError> {
        let encoder = self.config.encoder();
        let bits_per_index = self.config.bits_per_index();

        if pair.key.len() != self.config.keys_byte_length() {
            return Err(MerkleTreeError::proof_failed("Key has wrong length"));
        }
        if proof.other_pairs_in_leaf.len() >= self.config.max_values_per_leaf() {
            return Err(MerkleTreeError::proof_failed("Too many keys in leaf"));
        }
        if proof.root_metadata_no_hash.seqno == 0 {
            return Err(MerkleTreeError::proof_failed(
                "Empty proof: seqno 0 has no tree",
            ));
        }

        let key_specific_secret = match (E::BLINDED, &proof.key_specific_secret) {
            (true, None) => {
                return Err(MerkleTreeError::proof_failed(
                    "Missing key specific secret in blinded proof",
                ));
            }
            (true, secret) => secret.as_ref(),
            (false, _) => None,
        };
        let encoded_pair = KeyEncodedValuePair {
            key: pair.key.clone(),
            value: encoder
                .encode(&pair.value)
                .map_err(|e| MerkleTreeError::proof_failed(format!("Value encoding: {e}")))?
                .into(),
        };
        let value_hash = encoder
            .hash_key_encoded_value_pair_with_key_specific_secret(
                &encoded_pair,
                key_specific_secret,
            )
            .map_err(|e| MerkleTreeError::proof_failed(format!("Value hash: {e}")))?;

        let leaf_pairs = merge_into_leaf(
            &proof.other_pairs_in_leaf,
            KeyHashPair {
                key: pair.key.clone(),
                hash: value_hash,
            },
        )?;

        let siblings_per_level = (self.config.children_per_node() - 1) as usize;
        let siblings = &proof.sibling_hashes_on_path;
        let leaf_level = siblings.len() / siblings_per_level;
        if siblings.len() % siblings_per_level != 0 || leaf_level > self.config.max_depth() {
            return Err(MerkleTreeError::proof_failed(format!(
                "Invalid number of SiblingHashes: {}",
                siblings.len()
            )));
        }

        let mut current = hash_node(encoder, &Node::Leaf(leaf_pairs))?;
        for (level, level_siblings) in (1..=leaf_level)
            .rev()
            .zip(siblings.chunks(siblings_per_level))
        {
            let own_index = key_child_index_at_level(&pair.key, bits_per_index, level) as usize;
            let mut children = Vec::with_capacity(siblings_per_level + 1);
            children.extend_from_slice(&level_siblings[..own_index]);
            children.push(current);
            children.extend_from_slice(&level_siblings[own_index..]);
            current = hash_node(encoder, &Node::Interior(children))?;
        }

        let root = RootMetadata {
            seqno: proof.root_metadata_no_hash.seqno,
            bare_root_hash: current,
        };
        let root_hash = encoder
            .encode_and_hash_generic(&root)
            .map_err(|e| MerkleTreeError::proof_failed(format!("Root hash: {e}")))?;
        if &root_hash != expected_root_hash {
            return Err(MerkleTreeError::proof_failed(
                "expected rootHash does not match the computed one",
            ));
        }

        Ok(())
    }
}

fn hash_node<E: Encoder>(encoder: &E, node: &Node) -> Result<Hash, MerkleTreeError> {
    encoder
        .encode_and_hash_generic(node)
        .map_err(|e| MerkleTreeError::proof_failed(format!("Node hash: {e}")))
}

/// Insert the proved pair among the other pairs of its leaf, which must be strictly sorted by
/// key and must not already hold the proved key.
fn merge_into_leaf(
    others: &[KeyHashPair],
    proved: KeyHashPair,
) -> Result<Vec<KeyHashPair>, MerkleTreeError> {
    let ordering_error =
        || MerkleTreeError::proof_failed("Error in Leaf Key ordering or duplicated key");
    if others.windows(2).any(|w| w[0].key >= w[1].key) {
        return Err(ordering_error());
    }
    let insert_at = others
        .binary_search_by(|other| other.key.cmp(&proved.key))
        .err()
        .ok_or_else(ordering_error)?;

    let mut pairs = Vec::with_capacity(others.len() + 1);
    pairs.extend_from_slice(&others[..insert_at]);
    pairs.push(proved);
    pairs.extend_from_slice(&others[insert_at..]);

    Ok(pairs)
}
