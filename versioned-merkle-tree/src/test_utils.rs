//! Test tools: logger and fixture builders.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use slog::{Drain, Logger};
use slog_async::Async;
use slog_term::{CompactFormat, PlainDecorator};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use crate::encoder::Encoder;
use crate::storage::InMemoryStorageEngine;
use crate::{Config, Key, KeyValuePair, Tree};

/// Logger writing to the test output
pub struct TestLogger;

impl TestLogger {
    fn from_writer<W: io::Write + Send + 'static>(writer: W) -> Logger {
        let decorator = PlainDecorator::new(writer);
        let drain = CompactFormat::new(decorator).build().fuse();
        let drain = Async::new(drain).build().fuse();
        Logger::root(Arc::new(drain), slog::o!())
    }

    /// Logger printing to stdout, captured by the test harness
    pub fn stdout() -> Logger {
        Self::from_writer(slog_term::TestStdoutWriter)
    }
}

/// Builder of sorted, deterministic records.
///
/// Record `i` has the key `i * stride` (big endian, on `keys_byte_length` bytes) and the value
/// `"{value_prefix}-{i}"`.
pub struct KeyValuePairsBuilder {
    keys_byte_length: usize,
    stride: u128,
    value_prefix: String,
}

impl KeyValuePairsBuilder {
    /// KeyValuePairsBuilder factory, keys are consecutive integers by default
    pub fn new(keys_byte_length: usize) -> Self {
        Self {
            keys_byte_length,
            stride: 1,
            value_prefix: "value".to_string(),
        }
    }

    /// Distance between two consecutive keys
    pub fn stride(mut self, stride: u128) -> Self {
        self.stride = stride;
        self
    }

    /// Prefix of the generated values
    pub fn value_prefix(mut self, value_prefix: &str) -> Self {
        self.value_prefix = value_prefix.to_string();
        self
    }

    /// Key of the `index`-th record
    pub fn key(&self, index: usize) -> Key {
        let bytes = (index as u128 * self.stride).to_be_bytes();
        let mut key = vec![0u8; self.keys_byte_length.saturating_sub(bytes.len())];
        key.extend(&bytes[bytes.len().saturating_sub(self.keys_byte_length)..]);

        Key::new(key)
    }

    /// Build `count` records
    pub fn build(&self, count: usize) -> Vec<KeyValuePair<String>> {
        (0..count)
            .map(|index| KeyValuePair {
                key: self.key(index),
                value: format!("{}-{index}", self.value_prefix),
            })
            .collect()
    }
}

/// `count` records with distinct random keys, sorted by key, reproducible from `seed`
pub fn random_sorted_pairs(
    seed: u64,
    count: usize,
    keys_byte_length: usize,
) -> Vec<KeyValuePair<String>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut records = BTreeMap::new();
    while records.len() < count {
        let mut key = vec![0u8; keys_byte_length];
        rng.fill_bytes(&mut key);
        records.insert(Key::new(key), format!("value-{}", rng.next_u32()));
    }

    records
        .into_iter()
        .map(|(key, value)| KeyValuePair { key, value })
        .collect()
}

/// A tree of string values backed by a fresh [InMemoryStorageEngine]
pub fn in_memory_tree<E: Encoder>(
    config: Config<E>,
    step: usize,
) -> (Tree<String, E, InMemoryStorageEngine>, Arc<InMemoryStorageEngine>) {
    let storage_engine = Arc::new(InMemoryStorageEngine::new());
    let tree = Tree::new(
        Arc::new(config),
        storage_engine.clone(),
        step,
        TestLogger::stdout(),
    )
    .expect("step should be valid");

    (tree, storage_engine)
}
