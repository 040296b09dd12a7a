use serde::{Deserialize, Serialize};

use crate::MerkleTreeError;
use crate::encoder::Encoder;
use crate::position::children_per_node;

/// Widest child index a [Tree][crate::Tree] can build and prove over: every interior node holds
/// `2^bits_per_index` child hashes in memory.
pub const MAX_BUILDABLE_BITS_PER_INDEX: u8 = 16;

/// Raw tree parameters, as loaded from a deployment configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParameters {
    /// Width in bits of a child index, the tree has `2^bits_per_index` children per node
    pub bits_per_index: u8,

    /// Maximum number of records in a leaf
    pub max_values_per_leaf: usize,

    /// Byte length shared by every key of the tree
    pub keys_byte_length: usize,
}

/// Validated tree configuration, shared read-only by every tree and verifier built on it.
#[derive(Debug, Clone)]
pub struct Config<E: Encoder> {
    encoder: E,
    bits_per_index: u8,
    children_per_node: u64,
    max_values_per_leaf: usize,
    keys_byte_length: usize,
    max_depth: usize,
}

impl<E: Encoder> Config<E> {
    /// Build a configuration, checking its structural constraints
    pub fn new(
        encoder: E,
        bits_per_index: u8,
        max_values_per_leaf: usize,
        keys_byte_length: usize,
    ) -> Result<Self, MerkleTreeError> {
        if !(1..=63).contains(&bits_per_index) {
            return Err(MerkleTreeError::InvalidConfig(format!(
                "bits_per_index must be between 1 and 63, got {bits_per_index}"
            )));
        }
        if keys_byte_length == 0 {
            return Err(MerkleTreeError::InvalidConfig(
                "keys_byte_length must be at least 1".to_string(),
            ));
        }
        if (keys_byte_length * 8) % bits_per_index as usize != 0 {
            return Err(MerkleTreeError::InvalidConfig(format!(
                "keys_byte_length * 8 ({}) must be a multiple of bits_per_index ({bits_per_index})",
                keys_byte_length * 8
            )));
        }
        if max_values_per_leaf == 0 {
            return Err(MerkleTreeError::InvalidConfig(
                "max_values_per_leaf must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            encoder,
            bits_per_index,
            children_per_node: children_per_node(bits_per_index),
            max_values_per_leaf,
            keys_byte_length,
            max_depth: keys_byte_length * 8 / bits_per_index as usize,
        })
    }

    /// Build a configuration from deserialized parameters
    pub fn from_parameters(
        encoder: E,
        parameters: &ConfigParameters,
    ) -> Result<Self, MerkleTreeError> {
        Self::new(
            encoder,
            parameters.bits_per_index,
            parameters.max_values_per_leaf,
            parameters.keys_byte_length,
        )
    }

    /// Encoder of the tree
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Width in bits of a child index
    pub fn bits_per_index(&self) -> u8 {
        self.bits_per_index
    }

    /// `2^bits_per_index`
    pub fn children_per_node(&self) -> u64 {
        self.children_per_node
    }

    /// Maximum number of records in a leaf
    pub fn max_values_per_leaf(&self) -> usize {
        self.max_values_per_leaf
    }

    /// Byte length shared by every key of the tree
    pub fn keys_byte_length(&self) -> usize {
        self.keys_byte_length
    }

    /// Number of levels below the root when every leaf sits at key depth
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether value commitments are blinded
    pub fn use_blinded_value_hashes(&self) -> bool {
        E::BLINDED
    }

    /// Check that interior nodes of this configuration are narrow enough to be built, see
    /// [MAX_BUILDABLE_BITS_PER_INDEX]
    pub fn check_buildable(&self) -> Result<(), MerkleTreeError> {
        if self.bits_per_index > MAX_BUILDABLE_BITS_PER_INDEX {
            return Err(MerkleTreeError::InvalidConfig(format!(
                "bits_per_index {} is too wide to build a tree, at most {MAX_BUILDABLE_BITS_PER_INDEX} is supported",
                self.bits_per_index
            )));
        }

        Ok(())
    }

    /// Check that a key has the configured length
    pub fn check_key(&self, key: &[u8]) -> Result<(), MerkleTreeError> {
        if key.len() != self.keys_byte_length {
            return Err(MerkleTreeError::InvalidKey(format!(
                "key has wrong length: expected {} bytes, got {}",
                self.keys_byte_length,
                key.len()
            )));
        }

        Ok(())
    }
}
