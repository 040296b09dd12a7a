#![warn(missing_docs)]

//! Versioned, privacy-preserving Merkle tree.
//!
//! Provide:
//! - A [Tree] that stores key/value records as of successive versions ("seqnos") behind an
//!   injected [StorageEngine][storage::StorageEngine], and produces
//!   [inclusion proofs][MerkleInclusionProof] for any `(key, seqno)` pair.
//! - A stateless [MerkleProofVerifier] that checks those proofs against a trusted root hash.
//! - Pluggable [encoders][encoder] that hash values either in the clear or blinded by a
//!   per-version secret, so that hashes do not reveal whether a value changed between versions.
//! - The [skip pointers][skip_pointers] arithmetic used to jump between two versions in a
//!   logarithmic number of steps.

mod config;
pub mod encoder;
mod entities;
mod error;
pub mod logging;
mod position;
mod proof;
pub mod skip_pointers;
pub mod storage;
mod tree;

#[cfg(any(test, feature = "test_tools"))]
pub mod test_utils;

pub use config::{Config, ConfigParameters, MAX_BUILDABLE_BITS_PER_INDEX};
pub use entities::{
    ChildIndex, EncodedValue, Hash, Key, KeyEncodedValuePair, KeyHashPair, KeySpecificSecret,
    KeyValuePair, MasterSecret, Node, PositionHashPair, RootMetadata, Seqno,
};
pub use error::{MerkleTreeError, StdError, StdResult};
pub use position::Position;
pub use proof::{MerkleInclusionProof, MerkleProofVerifier};
pub use tree::Tree;
