use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use slog::{Logger, debug, trace, warn};
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::encoder::Encoder;
use crate::logging::LoggerExtensions;
use crate::position::key_child_index_at_level;
use crate::storage::{StorageEngine, StoredKeyValuePair};
use crate::{
    ChildIndex, Config, EncodedValue, Hash, Key, KeyEncodedValuePair, KeyHashPair,
    KeySpecificSecret, KeyValuePair, MasterSecret, MerkleInclusionProof, MerkleProofVerifier,
    MerkleTreeError, Node, Position, PositionHashPair, RootMetadata, Seqno, StdResult,
};

enum BuildTask {
    /// Hash the node at `position` over `pairs[range]`
    Visit {
        position: Position,
        level: usize,
        range: Range<usize>,
    },
    /// Pop the hashes of `children` and hash the interior node at `position`
    Assemble {
        position: Position,
        children: Vec<ChildIndex>,
    },
}

/// Versioned Merkle tree over an injected [StorageEngine].
///
/// Every call to [build_new_version][Tree::build_new_version] commits a new version, numbered
/// one past the latest committed seqno. Older versions stay readable and provable.
///
/// Builds are serialized by an internal lock, lookups share it.
pub struct Tree<V, E: Encoder, S: StorageEngine> {
    config: Arc<Config<E>>,
    storage_engine: Arc<S>,
    step: usize,
    lock: RwLock<()>,
    logger: Logger,
    _value: PhantomData<fn() -> V>,
}

impl<V, E, S> Tree<V, E, S>
where
    V: Serialize + DeserializeOwned,
    E: Encoder,
    S: StorageEngine,
{
    /// Tree factory.
    ///
    /// `step` is the number of tree levels whose sibling positions are fetched from storage in
    /// one batch when assembling a proof.
    ///
    /// Fails with [InvalidConfig][MerkleTreeError::InvalidConfig] if `step` is 0 or if the
    /// interior nodes of `config` are wider than
    /// [MAX_BUILDABLE_BITS_PER_INDEX][crate::MAX_BUILDABLE_BITS_PER_INDEX] allows.
    pub fn new(
        config: Arc<Config<E>>,
        storage_engine: Arc<S>,
        step: usize,
        logger: Logger,
    ) -> Result<Self, MerkleTreeError> {
        if step == 0 {
            return Err(MerkleTreeError::InvalidConfig(
                "step must be at least 1".to_string(),
            ));
        }
        config.check_buildable()?;

        Ok(Self {
            config,
            storage_engine,
            step,
            lock: RwLock::new(()),
            logger: logger.new_with_component_name::<Self>(),
            _value: PhantomData,
        })
    }

    /// Configuration of the tree
    pub fn config(&self) -> &Arc<Config<E>> {
        &self.config
    }

    /// A verifier for the proofs of this tree
    pub fn verifier(&self) -> MerkleProofVerifier<E> {
        MerkleProofVerifier::new(self.config.clone())
    }

    /// Build and commit a new version holding exactly the given records.
    ///
    /// `pairs` must be sorted by strictly increasing key. It must also contain every key
    /// present in any previous version (unchanged values included): this is not checked, and a
    /// missing key keeps returning its last stored value from lookups at later seqnos while its
    /// proofs fail to verify.
    ///
    /// Returns the new seqno and its root hash. Nothing is committed on failure or
    /// cancellation.
    pub async fn build_new_version(
        &self,
        pairs: &[KeyValuePair<V>],
        cancellation_token: &CancellationToken,
    ) -> StdResult<(Seqno, Hash)> {
        let _build_guard = self.lock.write().await;
        debug!(self.logger, ">> build_new_version"; "nb_pairs" => pairs.len());

        let pairs = self.encode_build_input(pairs)?;
        let mut transaction = self.storage_engine.begin().await?;
        let result = self
            .build_in_transaction(&mut transaction, &pairs, cancellation_token)
            .await;
        let (seqno, root_hash) = self.commit_or_abort(transaction, result).await?;

        debug!(
            self.logger, "<< build_new_version";
            "seqno" => seqno, "root_hash" => root_hash.to_hex()
        );

        Ok((seqno, root_hash))
    }

    fn encode_build_input(&self, pairs: &[KeyValuePair<V>]) -> StdResult<Vec<KeyEncodedValuePair>> {
        for pair in pairs {
            self.config.check_key(&pair.key)?;
        }
        if let Some(unsorted) = pairs.windows(2).find(|w| w[0].key >= w[1].key) {
            return Err(MerkleTreeError::UnsortedKeys {
                previous: unsorted[0].key.to_hex(),
                next: unsorted[1].key.to_hex(),
            }
            .into());
        }

        pairs
            .iter()
            .map(|pair| {
                Ok(KeyEncodedValuePair {
                    key: pair.key.clone(),
                    value: EncodedValue::new(self.config.encoder().encode(&pair.value)?),
                })
            })
            .collect()
    }

    async fn build_in_transaction(
        &self,
        transaction: &mut S::Transaction,
        pairs: &[KeyEncodedValuePair],
        cancellation_token: &CancellationToken,
    ) -> StdResult<(Seqno, Hash)> {
        let encoder = self.config.encoder();
        let (latest_seqno, _) = self.storage_engine.lookup_latest_root(transaction).await?;
        let seqno = latest_seqno + 1;

        let master_secret = if self.config.use_blinded_value_hashes() {
            let master_secret = encoder.generate_master_secret(seqno)?;
            self.storage_engine
                .store_master_secret(transaction, seqno, &master_secret)
                .await?;
            Some(master_secret)
        } else {
            None
        };

        let bare_root_hash = self
            .hash_tree(
                transaction,
                seqno,
                pairs,
                master_secret.as_ref(),
                cancellation_token,
            )
            .await?;
        let root = RootMetadata {
            seqno,
            bare_root_hash,
        };
        self.storage_engine
            .store_root_metadata(transaction, &root)
            .await?;

        Ok((seqno, encoder.encode_and_hash_generic(&root)?))
    }

    async fn hash_tree(
        &self,
        transaction: &mut S::Transaction,
        seqno: Seqno,
        pairs: &[KeyEncodedValuePair],
        master_secret: Option<&MasterSecret>,
        cancellation_token: &CancellationToken,
    ) -> StdResult<Hash> {
        let bits_per_index = self.config.bits_per_index();
        let mut tasks = vec![BuildTask::Visit {
            position: Position::root(),
            level: 0,
            range: 0..pairs.len(),
        }];
        let mut hashes: Vec<Hash> = vec![];

        while let Some(task) = tasks.pop() {
            match task {
                BuildTask::Visit {
                    position,
                    level,
                    range,
                } => {
                    if cancellation_token.is_cancelled() {
                        return Err(MerkleTreeError::BuildCancelled.into());
                    }

                    if range.len() <= self.config.max_values_per_leaf()
                        || level >= self.config.max_depth()
                    {
                        let hash = self
                            .hash_leaf(transaction, seqno, &position, &pairs[range], master_secret)
                            .await?;
                        hashes.push(hash);
                        continue;
                    }

                    let children = partition_by_child(pairs, range, bits_per_index, level + 1);
                    tasks.push(BuildTask::Assemble {
                        position: position.clone(),
                        children: children.iter().map(|(index, _)| *index).collect(),
                    });
                    for (index, child_range) in children.into_iter().rev() {
                        tasks.push(BuildTask::Visit {
                            position: position.child(bits_per_index, index),
                            level: level + 1,
                            range: child_range,
                        });
                    }
                }
                BuildTask::Assemble { position, children } => {
                    let child_hashes = hashes.split_off(hashes.len() - children.len());
                    let mut slots = vec![Hash::default(); self.config.children_per_node() as usize];
                    for (index, hash) in children.into_iter().zip(child_hashes) {
                        slots[index as usize] = hash;
                    }

                    let hash = self
                        .config
                        .encoder()
                        .encode_and_hash_generic(&Node::Interior(slots))?;
                    self.storage_engine
                        .store_node(transaction, seqno, &position, &hash)
                        .await?;
                    hashes.push(hash);
                }
            }
        }

        hashes
            .pop()
            .ok_or_else(|| anyhow!("Tree build ended without a root hash"))
    }

    async fn hash_leaf(
        &self,
        transaction: &mut S::Transaction,
        seqno: Seqno,
        position: &Position,
        pairs: &[KeyEncodedValuePair],
        master_secret: Option<&MasterSecret>,
    ) -> StdResult<Hash> {
        let encoder = self.config.encoder();
        let mut value_hashes = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let key_specific_secret = master_secret
                .map(|secret| encoder.compute_key_specific_secret(secret, &pair.key))
                .transpose()?;
            value_hashes.push(
                encoder.hash_key_encoded_value_pair_with_key_specific_secret(
                    pair,
                    key_specific_secret.as_ref(),
                )?,
            );
        }
        self.storage_engine
            .store_key_value_pairs(transaction, seqno, pairs, &value_hashes)
            .await?;

        let leaf = Node::Leaf(
            pairs
                .iter()
                .zip(value_hashes)
                .map(|(pair, hash)| KeyHashPair {
                    key: pair.key.clone(),
                    hash,
                })
                .collect(),
        );
        let hash = encoder.encode_and_hash_generic(&leaf)?;
        self.storage_engine
            .store_node(transaction, seqno, position, &hash)
            .await?;

        Ok(hash)
    }

    /// Value of `key` as of the committed version `seqno`.
    ///
    /// Fails with [InvalidSeqno][MerkleTreeError::InvalidSeqno] if no root is committed at
    /// `seqno` and with [KeyNotFound][MerkleTreeError::KeyNotFound] if the key was never
    /// stored at or before it.
    pub async fn get_value(&self, seqno: Seqno, key: &Key) -> StdResult<V> {
        let _guard = self.lock.read().await;
        let transaction = self.storage_engine.begin().await?;
        let result = async {
            self.check_lookup(seqno, key)?;
            self.storage_engine.lookup_root(&transaction, seqno).await?;
            let stored = self
                .storage_engine
                .lookup_key_value_pair(&transaction, seqno, key)
                .await?;
            self.decode_value(&stored)
        }
        .await;

        self.release(transaction, result).await
    }

    /// Latest value of `key` stored at or before `seqno`, whether a root is committed at
    /// `seqno` or not.
    pub async fn get_value_unchecked(&self, seqno: Seqno, key: &Key) -> StdResult<V> {
        let _guard = self.lock.read().await;
        let transaction = self.storage_engine.begin().await?;
        let result = async {
            self.check_lookup(seqno, key)?;
            let stored = self
                .storage_engine
                .lookup_key_value_pair(&transaction, seqno, key)
                .await?;
            self.decode_value(&stored)
        }
        .await;

        self.release(transaction, result).await
    }

    /// Value of `key` as of the committed version `seqno`, with a proof of its inclusion in
    /// that version, to be checked against the root hash of `seqno` by a
    /// [MerkleProofVerifier].
    pub async fn get_value_with_proof(
        &self,
        seqno: Seqno,
        key: &Key,
    ) -> StdResult<(V, MerkleInclusionProof)> {
        let _guard = self.lock.read().await;
        let transaction = self.storage_engine.begin().await?;
        let result = self.assemble_proof(&transaction, seqno, key).await;

        self.release(transaction, result).await
    }

    async fn assemble_proof(
        &self,
        transaction: &S::Transaction,
        seqno: Seqno,
        key: &Key,
    ) -> StdResult<(V, MerkleInclusionProof)> {
        self.check_lookup(seqno, key)?;
        let root = self.storage_engine.lookup_root(transaction, seqno).await?;
        let stored = self
            .storage_engine
            .lookup_key_value_pair(transaction, seqno, key)
            .await?;

        let bits_per_index = self.config.bits_per_index();
        let deepest = Position::deepest_for_key(key);
        let siblings = self.fetch_siblings(transaction, seqno, &deepest).await?;
        let leaf_level = siblings
            .iter()
            .map(|sibling| sibling.position.level(bits_per_index))
            .max()
            .unwrap_or(0);
        let sibling_hashes_on_path = self.order_sibling_hashes(key, leaf_level, siblings)?;

        let leaf_position = deepest
            .ancestor_at_level(bits_per_index, leaf_level)
            .ok_or_else(|| anyhow!("Leaf level {leaf_level} is deeper than key {key}"))?;
        let other_pairs_in_leaf = self
            .storage_engine
            .lookup_key_hash_pairs_under_position(transaction, seqno, &leaf_position)
            .await?
            .into_iter()
            .filter(|pair| &pair.key != key)
            .collect();

        let key_specific_secret = self
            .key_specific_secret(transaction, &stored)
            .await?;
        trace!(
            self.logger, "Assembled inclusion proof";
            "seqno" => seqno, "key" => key.to_hex(), "leaf_level" => leaf_level
        );

        Ok((
            self.decode_value(&stored)?,
            MerkleInclusionProof {
                key_specific_secret,
                other_pairs_in_leaf,
                sibling_hashes_on_path,
                root_metadata_no_hash: root.without_hash(),
            },
        ))
    }

    /// Hashes of the siblings of the path to `deepest`, fetched `step` levels per batch.
    ///
    /// Each batch also asks for the path node at its deepest level: when it is absent the
    /// leaf was already reached and no deeper batch is needed.
    async fn fetch_siblings(
        &self,
        transaction: &S::Transaction,
        seqno: Seqno,
        deepest: &Position,
    ) -> StdResult<Vec<PositionHashPair>> {
        let bits_per_index = self.config.bits_per_index();
        let max_depth = self.config.max_depth();
        let mut siblings = vec![];
        let mut first_level = 1;

        while first_level <= max_depth {
            let last_level = (first_level + self.step - 1).min(max_depth);
            let mut positions = vec![];
            for level in first_level..=last_level {
                if let Some((_, level_siblings)) = deepest
                    .ancestor_at_level(bits_per_index, level)
                    .and_then(|on_path| on_path.siblings(bits_per_index))
                {
                    positions.extend(level_siblings);
                }
            }
            let candidate = deepest
                .ancestor_at_level(bits_per_index, last_level)
                .ok_or_else(|| anyhow!("Level {last_level} is deeper than the key"))?;
            positions.push(candidate.clone());

            let mut found = self
                .storage_engine
                .lookup_nodes(transaction, seqno, &positions)
                .await?;
            let reached_leaf = !found.iter().any(|node| node.position == candidate);
            found.retain(|node| node.position != candidate);
            siblings.extend(found);

            if reached_leaf {
                break;
            }
            first_level = last_level + 1;
        }

        Ok(siblings)
    }

    /// Lay sibling hashes out level by level from `leaf_level` up to the root, each level
    /// holding its `children_per_node - 1` siblings by child index, absent ones left empty.
    fn order_sibling_hashes(
        &self,
        key: &Key,
        leaf_level: usize,
        siblings: Vec<PositionHashPair>,
    ) -> StdResult<Vec<Hash>> {
        let bits_per_index = self.config.bits_per_index();
        let siblings_per_level = (self.config.children_per_node() - 1) as usize;
        let mut hashes = vec![Hash::default(); leaf_level * siblings_per_level];

        for sibling in siblings {
            let level = sibling.position.level(bits_per_index);
            let index = sibling.position.child_index(bits_per_index);
            let own_index = key_child_index_at_level(key, bits_per_index, level);
            let slot = (leaf_level - level) * siblings_per_level + index as usize
                - usize::from(index > own_index);
            let entry = hashes
                .get_mut(slot)
                .with_context(|| format!("Sibling {:?} is off the proof path", sibling.position))?;
            *entry = sibling.hash;
        }

        Ok(hashes)
    }

    async fn key_specific_secret(
        &self,
        transaction: &S::Transaction,
        stored: &StoredKeyValuePair,
    ) -> StdResult<Option<KeySpecificSecret>> {
        if !self.config.use_blinded_value_hashes() {
            return Ok(None);
        }

        let master_secrets = self
            .storage_engine
            .lookup_master_secrets(transaction, &[stored.seqno])
            .await?;
        let master_secret = master_secrets
            .get(&stored.seqno)
            .ok_or_else(|| anyhow!("No master secret stored for seqno {}", stored.seqno))?;

        Ok(Some(
            self.config
                .encoder()
                .compute_key_specific_secret(master_secret, &stored.pair.key)?,
        ))
    }

    /// Latest committed root and its root hash, `None` if nothing was ever committed
    pub async fn get_latest_root(&self) -> StdResult<Option<(RootMetadata, Hash)>> {
        let _guard = self.lock.read().await;
        let transaction = self.storage_engine.begin().await?;
        let result: StdResult<Option<(RootMetadata, Hash)>> = async {
            let (seqno, root) = self.storage_engine.lookup_latest_root(&transaction).await?;
            if seqno == 0 {
                return Ok(None);
            }
            let root_hash = self.config.encoder().encode_and_hash_generic(&root)?;

            Ok(Some((root, root_hash)))
        }
        .await;

        self.release(transaction, result).await
    }

    /// Root hash of the committed version `seqno`
    pub async fn get_root_hash(&self, seqno: Seqno) -> StdResult<Hash> {
        let _guard = self.lock.read().await;
        let transaction = self.storage_engine.begin().await?;
        let result: StdResult<Hash> = async {
            if seqno == 0 {
                return Err(MerkleTreeError::invalid_seqno(seqno, "seqno 0 has no tree").into());
            }
            let root = self.storage_engine.lookup_root(&transaction, seqno).await?;

            self.config.encoder().encode_and_hash_generic(&root)
        }
        .await;

        self.release(transaction, result).await
    }

    fn check_lookup(&self, seqno: Seqno, key: &Key) -> Result<(), MerkleTreeError> {
        if seqno == 0 {
            return Err(MerkleTreeError::invalid_seqno(seqno, "seqno 0 has no tree"));
        }

        self.config.check_key(key)
    }

    fn decode_value(&self, stored: &StoredKeyValuePair) -> StdResult<V> {
        self.config
            .encoder()
            .decode(&stored.pair.value)
            .with_context(|| format!("Could not decode value of key {}", stored.pair.key))
    }

    /// Commit the transaction if `result` is a success, abort it otherwise
    async fn commit_or_abort<T>(
        &self,
        transaction: S::Transaction,
        result: StdResult<T>,
    ) -> StdResult<T> {
        match result {
            Ok(value) => {
                self.storage_engine.commit(transaction).await?;
                Ok(value)
            }
            Err(error) => {
                self.abort_after_failure(transaction).await;
                Err(error)
            }
        }
    }

    /// Release a transaction that was only read from
    async fn release<T>(&self, transaction: S::Transaction, result: StdResult<T>) -> StdResult<T> {
        match result {
            Ok(value) => {
                self.storage_engine.abort(transaction).await?;
                Ok(value)
            }
            Err(error) => {
                self.abort_after_failure(transaction).await;
                Err(error)
            }
        }
    }

    async fn abort_after_failure(&self, transaction: S::Transaction) {
        if let Err(error) = self.storage_engine.abort(transaction).await {
            warn!(self.logger, "Transaction abort failed"; "error" => ?error);
        }
    }
}

/// Split `pairs[range]` into the contiguous runs of keys sharing their child index at `level`
fn partition_by_child(
    pairs: &[KeyEncodedValuePair],
    range: Range<usize>,
    bits_per_index: u8,
    level: usize,
) -> Vec<(ChildIndex, Range<usize>)> {
    let mut children: Vec<(ChildIndex, Range<usize>)> = vec![];
    for position in range {
        let index = key_child_index_at_level(&pairs[position].key, bits_per_index, level);
        match children.last_mut() {
            Some((last_index, last_range)) if *last_index == index => last_range.end = position + 1,
            _ => children.push((index, position..position + 1)),
        }
    }

    children
}
