use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

use crate::storage::{StorageEngine, StoredKeyValuePair};
use crate::{
    EncodedValue, Hash, Key, KeyEncodedValuePair, KeyHashPair, MasterSecret, MerkleTreeError,
    Position, PositionHashPair, RootMetadata, Seqno, StdResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredValue {
    value: EncodedValue,
    hash: Hash,
}

#[derive(Debug, Default)]
struct InMemoryStore {
    roots: BTreeMap<Seqno, RootMetadata>,
    nodes: BTreeMap<(Position, Seqno), Hash>,
    pairs: BTreeMap<(Key, Seqno), StoredValue>,
    master_secrets: BTreeMap<Seqno, MasterSecret>,
}

/// Latest entry of `id` stored at or before `seqno`
fn latest_at<'a, I: Ord + Clone, V>(
    map: &'a BTreeMap<(I, Seqno), V>,
    id: &I,
    seqno: Seqno,
) -> Option<(Seqno, &'a V)> {
    map.range((id.clone(), 0)..=(id.clone(), seqno))
        .next_back()
        .map(|((_, stored_seqno), value)| (*stored_seqno, value))
}

/// Latest of two optional versioned entries
fn latest_of<'a, V>(
    left: Option<(Seqno, &'a V)>,
    right: Option<(Seqno, &'a V)>,
) -> Option<(Seqno, &'a V)> {
    match (left, right) {
        (Some(left), Some(right)) => Some(if left.0 >= right.0 { left } else { right }),
        (left, right) => left.or(right),
    }
}

impl InMemoryStore {
    fn append(&mut self, other: InMemoryStore) {
        self.roots.extend(other.roots);
        self.nodes.extend(other.nodes);
        self.pairs.extend(other.pairs);
        self.master_secrets.extend(other.master_secrets);
    }

    fn latest_root(&self) -> Option<(&Seqno, &RootMetadata)> {
        self.roots.last_key_value()
    }

    /// Latest commitment at or before `seqno` of every key descending from `position`
    fn collect_key_hashes_under(
        &self,
        seqno: Seqno,
        position: &Position,
        collected: &mut BTreeMap<Key, (Seqno, Hash)>,
    ) {
        let Some(((first_key, _), _)) = self.pairs.first_key_value() else {
            return;
        };
        let start = (position.min_key(first_key.len()), 0);

        for ((key, stored_seqno), stored) in self
            .pairs
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((key, _), _)| position.is_ancestor_of_key(key))
        {
            if *stored_seqno > seqno {
                continue;
            }
            let newer = collected
                .get(key)
                .is_none_or(|(collected_seqno, _)| collected_seqno < stored_seqno);
            if newer {
                collected.insert(key.clone(), (*stored_seqno, stored.hash.clone()));
            }
        }
    }
}

/// Writes of a transaction, published by [InMemoryStorageEngine::commit]
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    staged: InMemoryStore,
}

/// A [StorageEngine] that keeps every version in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorageEngine {
    committed: RwLock<InMemoryStore>,
}

impl InMemoryStorageEngine {
    /// InMemoryStorageEngine factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Seqnos of every committed root, in increasing order
    pub async fn committed_seqnos(&self) -> Vec<Seqno> {
        self.committed.read().await.roots.keys().copied().collect()
    }
}

#[async_trait]
impl StorageEngine for InMemoryStorageEngine {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> StdResult<Self::Transaction> {
        Ok(InMemoryTransaction::default())
    }

    async fn commit(&self, transaction: Self::Transaction) -> StdResult<()> {
        let mut committed = self.committed.write().await;
        if let Some(seqno) = transaction
            .staged
            .roots
            .keys()
            .find(|seqno| committed.roots.contains_key(seqno))
        {
            return Err(anyhow!(
                "A root is already committed for seqno {seqno}, transaction rejected"
            ));
        }
        committed.append(transaction.staged);

        Ok(())
    }

    async fn abort(&self, transaction: Self::Transaction) -> StdResult<()> {
        drop(transaction);

        Ok(())
    }

    async fn store_key_value_pairs(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        pairs: &[KeyEncodedValuePair],
        hashes: &[Hash],
    ) -> StdResult<()> {
        if pairs.len() != hashes.len() {
            return Err(anyhow!(
                "Got {} pairs but {} hashes to store",
                pairs.len(),
                hashes.len()
            ));
        }
        for (pair, hash) in pairs.iter().zip(hashes) {
            transaction.staged.pairs.insert(
                (pair.key.clone(), seqno),
                StoredValue {
                    value: pair.value.clone(),
                    hash: hash.clone(),
                },
            );
        }

        Ok(())
    }

    async fn store_node(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        position: &Position,
        hash: &Hash,
    ) -> StdResult<()> {
        transaction
            .staged
            .nodes
            .insert((position.clone(), seqno), hash.clone());

        Ok(())
    }

    async fn store_root_metadata(
        &self,
        transaction: &mut Self::Transaction,
        root: &RootMetadata,
    ) -> StdResult<()> {
        transaction.staged.roots.insert(root.seqno, root.clone());

        Ok(())
    }

    async fn store_master_secret(
        &self,
        transaction: &mut Self::Transaction,
        seqno: Seqno,
        master_secret: &MasterSecret,
    ) -> StdResult<()> {
        transaction
            .staged
            .master_secrets
            .insert(seqno, master_secret.clone());

        Ok(())
    }

    async fn lookup_latest_root(
        &self,
        transaction: &Self::Transaction,
    ) -> StdResult<(Seqno, RootMetadata)> {
        let committed = self.committed.read().await;
        let latest = match (transaction.staged.latest_root(), committed.latest_root()) {
            (Some(staged), Some(committed)) => {
                Some(std::cmp::max_by_key(staged, committed, |(seqno, _)| **seqno))
            }
            (staged, committed) => staged.or(committed),
        };

        Ok(latest
            .map(|(seqno, root)| (*seqno, root.clone()))
            .unwrap_or_default())
    }

    async fn lookup_root(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
    ) -> StdResult<RootMetadata> {
        let committed = self.committed.read().await;

        transaction
            .staged
            .roots
            .get(&seqno)
            .or_else(|| committed.roots.get(&seqno))
            .cloned()
            .ok_or_else(|| MerkleTreeError::invalid_seqno(seqno, "no root was committed").into())
    }

    async fn lookup_node(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        position: &Position,
    ) -> StdResult<Hash> {
        self.lookup_nodes(transaction, seqno, std::slice::from_ref(position))
            .await?
            .pop()
            .map(|node| node.hash)
            .ok_or_else(|| anyhow!("No node stored at {position:?} as of seqno {seqno}"))
    }

    async fn lookup_nodes(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        positions: &[Position],
    ) -> StdResult<Vec<PositionHashPair>> {
        let committed = self.committed.read().await;

        Ok(positions
            .iter()
            .filter_map(|position| {
                latest_of(
                    latest_at(&transaction.staged.nodes, position, seqno),
                    latest_at(&committed.nodes, position, seqno),
                )
                .map(|(_, hash)| PositionHashPair {
                    position: position.clone(),
                    hash: hash.clone(),
                })
            })
            .collect())
    }

    async fn lookup_key_value_pair(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        key: &Key,
    ) -> StdResult<StoredKeyValuePair> {
        let committed = self.committed.read().await;
        let (stored_seqno, stored) = latest_of(
            latest_at(&transaction.staged.pairs, key, seqno),
            latest_at(&committed.pairs, key, seqno),
        )
        .ok_or(MerkleTreeError::KeyNotFound)?;

        Ok(StoredKeyValuePair {
            pair: KeyEncodedValuePair {
                key: key.clone(),
                value: stored.value.clone(),
            },
            hash: stored.hash.clone(),
            seqno: stored_seqno,
        })
    }

    async fn lookup_key_hash_pairs_under_position(
        &self,
        transaction: &Self::Transaction,
        seqno: Seqno,
        position: &Position,
    ) -> StdResult<Vec<KeyHashPair>> {
        let committed = self.committed.read().await;
        let mut collected = BTreeMap::new();
        committed.collect_key_hashes_under(seqno, position, &mut collected);
        transaction
            .staged
            .collect_key_hashes_under(seqno, position, &mut collected);

        Ok(collected
            .into_iter()
            .map(|(key, (_, hash))| KeyHashPair { key, hash })
            .collect())
    }

    async fn lookup_master_secrets(
        &self,
        transaction: &Self::Transaction,
        seqnos: &[Seqno],
    ) -> StdResult<BTreeMap<Seqno, MasterSecret>> {
        let committed = self.committed.read().await;

        Ok(seqnos
            .iter()
            .filter_map(|seqno| {
                transaction
                    .staged
                    .master_secrets
                    .get(seqno)
                    .or_else(|| committed.master_secrets.get(seqno))
                    .map(|secret| (*seqno, secret.clone()))
            })
            .collect())
    }
}
