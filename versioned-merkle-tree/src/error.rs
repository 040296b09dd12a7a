//! Crate specific errors

use crate::Seqno;

/// Generic error type
pub type StdError = anyhow::Error;

/// Generic result type
pub type StdResult<T> = anyhow::Result<T, StdError>;

/// Error types related to the versioned merkle tree.
///
/// Operations that reach the storage engine return a [StdResult]; the variants below can be
/// recovered from it with `downcast_ref::<MerkleTreeError>()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleTreeError {
    /// The tree configuration violates a structural constraint
    #[error("Invalid tree configuration: {0}")]
    InvalidConfig(String),

    /// A key does not have the length required by the configuration
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The seqno has no committed root (seqno 0 never has one)
    #[error("Invalid seqno {seqno}: {reason}")]
    InvalidSeqno {
        /// The requested seqno
        seqno: Seqno,
        /// Why the seqno was rejected
        reason: String,
    },

    /// The seqno is valid but the key was never stored at or before it
    #[error("Key not found")]
    KeyNotFound,

    /// A merkle inclusion proof did not verify
    #[error("Proof verification failed: {0}")]
    ProofVerificationFailed(String),

    /// A seqno range starts at 0 or after its end
    #[error("Invalid seqno range from {start} to {end}: start must be between 1 and end")]
    InvalidSeqnoRange {
        /// Start of the range
        start: Seqno,
        /// End of the range
        end: Seqno,
    },

    /// The pairs given to a build are not sorted by strictly increasing key
    #[error("Keys must be sorted and unique, found {previous} followed by {next}")]
    UnsortedKeys {
        /// Hex encoding of the first out of order key
        previous: String,
        /// Hex encoding of the key that follows it
        next: String,
    },

    /// The build was cancelled before completion, nothing was committed
    #[error("Tree build was cancelled")]
    BuildCancelled,
}

impl MerkleTreeError {
    pub(crate) fn invalid_seqno<T: Into<String>>(seqno: Seqno, reason: T) -> Self {
        Self::InvalidSeqno {
            seqno,
            reason: reason.into(),
        }
    }

    pub(crate) fn proof_failed<T: Into<String>>(reason: T) -> Self {
        Self::ProofVerificationFailed(reason.into())
    }
}
