//! Storage abstraction behind the tree.
//!
//! Every durable piece of a tree lives in a [StorageEngine]: record values and commitments,
//! node hashes, root metadata and master secrets. Each of them is stored tagged with the seqno
//! that wrote it, and lookups at a seqno return the latest entry written at or before it.

mod memory_engine;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::{
    Hash, Key, KeyEncodedValuePair, KeyHashPair, MasterSecret, Position, PositionHashPair,
    RootMetadata, Seqno, StdResult,
};

pub use memory_engine::{InMemoryStorageEngine, InMemoryTransaction};

/// A record as returned by a lookup, along with the seqno that stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKeyValuePair {
    /// The record, value still encoded
    pub pair: KeyEncodedValuePair,

    /// Value commitment of the record
    pub hash: Hash,

    /// Seqno at which this version of the record was stored
    pub seqno: Seqno,
}

/// Persistence backend of a tree.
///
/// Writes happen inside a transaction that is either committed or aborted as a whole: an
/// aborted transaction must leave nothing visible to later lookups, in particular no root.
#[async_trait]
pub trait StorageEngine: Sync + Send {
    /// Opaque transaction handle, never inspected by the tree
    type Transaction: Send + Sync;

    /// Open a new transaction
    async fn begin(&self) -> StdResult<Self::Transaction>;

    /// Publish every write of the transaction
    async fn commit(&self, transaction: Self::Transaction) -> StdResult<()>;

    /// Discard every write of the transaction
    async fn abort(&self, transaction: Self::Transaction) -> StdResult<()>;

    /// Store the records of a leaf along with their value commitments (same order)
    async fn store_key_value_pairs(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        pairs: &[KeyEncodedValuePair],
        hashes: &[Hash],
    ) -> StdResult<()>;

    /// Store the hash of the node at `position`
    async fn store_node(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        position: &Position,
        hash: &Hash,
    ) -> StdResult<()>;

    /// Store the root metadata of a new version
    async fn store_root_metadata(
        &self,
        transaction: &mut Self::Transaction,
        root: &RootMetadata,
    ) -> StdResult<()>;

    /// Store the master secret of a version
    async fn store_master_secret(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        master_secret: &MasterSecret,
    ) -> StdResult<()>;

    /// Latest committed root, `(0, RootMetadata::default())` if nothing was ever committed
    async fn lookup_latest_root(
        &self,
        transaction: &Self::Transaction,
    ) -> StdResult<(Seqno, RootMetadata)>;

    /// Root committed at exactly `seqno`, fails with
    /// [InvalidSeqno][crate::MerkleTreeError::InvalidSeqno] if there is none
    async fn lookup_root(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
    ) -> StdResult<RootMetadata>;

    /// Hash at `position` as of `seqno`, fails if none was ever stored
    async fn lookup_node(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        position: &Position,
    ) -> StdResult<Hash>;

    /// Batched [lookup_node][Self::lookup_node], positions without a hash are omitted
    async fn lookup_nodes(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        positions: &[Position],
    ) -> StdResult<Vec<PositionHashPair>>;

    /// Record for `key` as of `seqno`, fails with
    /// [KeyNotFound][crate::MerkleTreeError::KeyNotFound] if it was never stored
    async fn lookup_key_value_pair(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        key: &Key,
    ) -> StdResult<StoredKeyValuePair>;

    /// Commitments as of `seqno` of every key descending from `position`, sorted by key
    async fn lookup_key_hash_pairs_under_position(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        position: &Position,
    ) -> StdResult<Vec<KeyHashPair>>;

    /// Master secrets of the given seqnos, seqnos without a secret are omitted
    async fn lookup_master_secrets(
        &self,
        transaction: &Self::Transaction,
        seqnos: &[Seqno],
    ) -> StdResult<BTreeMap<Seqno, MasterSecret>>;
}
