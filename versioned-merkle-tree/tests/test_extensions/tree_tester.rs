use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use versioned_merkle_tree::encoder::Encoder;
use versioned_merkle_tree::storage::InMemoryStorageEngine;
use versioned_merkle_tree::test_utils::in_memory_tree;
use versioned_merkle_tree::{
    Config, Hash, KeyValuePair, MerkleProofVerifier, MerkleTreeError, Seqno, StdResult, Tree,
};

/// A tree over an in-memory storage engine, with the root hash of each built version.
pub struct TreeTester<E: Encoder> {
    pub tree: Arc<Tree<String, E, InMemoryStorageEngine>>,
    pub storage_engine: Arc<InMemoryStorageEngine>,
    pub verifier: MerkleProofVerifier<E>,
    pub root_hashes: Vec<Hash>,
}

impl<E: Encoder> TreeTester<E> {
    pub fn new(config: Config<E>, step: usize) -> Self {
        let (tree, storage_engine) = in_memory_tree(config, step);

        Self {
            verifier: tree.verifier(),
            tree: Arc::new(tree),
            storage_engine,
            root_hashes: vec![],
        }
    }

    pub async fn build(&mut self, pairs: &[KeyValuePair<String>]) -> Seqno {
        let (seqno, root_hash) = self
            .tree
            .build_new_version(pairs, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(self.root_hashes.len() as Seqno + 1, seqno);
        self.root_hashes.push(root_hash);

        seqno
    }

    pub fn root_hash(&self, seqno: Seqno) -> &Hash {
        &self.root_hashes[seqno as usize - 1]
    }

    /// Fetch the value and proof of `pair.key` at `seqno` and check both against `pair`
    pub async fn assert_proved(&self, seqno: Seqno, pair: &KeyValuePair<String>) {
        let (value, proof) = self
            .tree
            .get_value_with_proof(seqno, &pair.key)
            .await
            .unwrap_or_else(|e| panic!("No proof for key {} at seqno {seqno}: {e:?}", pair.key));

        assert_eq!(pair.value, value, "Wrong value for key {}", pair.key);
        self.verifier
            .verify_inclusion_proof(pair, &proof, self.root_hash(seqno))
            .unwrap_or_else(|e| panic!("Proof of key {} at seqno {seqno}: {e}", pair.key));
    }
}

pub fn merkle_tree_error<T>(result: StdResult<T>) -> MerkleTreeError {
    match result {
        Ok(_) => panic!("Expected a merkle tree error, got a success"),
        Err(error) => error
            .downcast::<MerkleTreeError>()
            .unwrap_or_else(|e| panic!("Expected a merkle tree error, got {e:?}")),
    }
}
