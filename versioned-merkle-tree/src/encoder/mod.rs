//! Encoders: canonical serialization, hashing and value blinding.
//!
//! An [Encoder] bundles every cryptographic choice of a tree: the canonical encoding of the
//! hashed structures, the generic hash, and the (optionally keyed) value commitment.
//! Whether values are blinded is a property of the encoder type, see [Encoder::BLINDED].

mod canonical;
mod identity;
mod sha512_256;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Hash, Key, KeyEncodedValuePair, KeySpecificSecret, MasterSecret, Seqno, StdResult};

pub use identity::{IdentityBlindedEncoder, IdentityEncoder};
pub use sha512_256::{BlindedSha512_256Encoder, Sha512_256Encoder};

/// Capability set used by the tree and the proof verifier to serialize and hash.
pub trait Encoder: Clone + Send + Sync + 'static {
    /// Whether value commitments are keyed by a per-version secret
    const BLINDED: bool;

    /// Canonical serialization: equal logical values always give identical bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> StdResult<Vec<u8>> {
        canonical::encode(value)
    }

    /// Inverse of [Encoder::encode]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> StdResult<T> {
        canonical::decode(bytes)
    }

    /// Unkeyed hash of raw bytes
    fn hash_generic(&self, bytes: &[u8]) -> Hash;

    /// Unkeyed hash of the canonical encoding of a value
    fn encode_and_hash_generic<T: Serialize + ?Sized>(&self, value: &T) -> StdResult<Hash> {
        Ok(self.hash_generic(&self.encode(value)?))
    }

    /// Fresh blinding seed for the version being built
    fn generate_master_secret(&self, seqno: Seqno) -> StdResult<MasterSecret>;

    /// Deterministic secret bound to one key of one version
    fn compute_key_specific_secret(
        &self,
        master_secret: &MasterSecret,
        key: &Key,
    ) -> StdResult<KeySpecificSecret>;

    /// Value commitment of a record.
    ///
    /// Blinded encoders require the key specific secret of the record and fail without it,
    /// unblinded encoders ignore it.
    fn hash_key_encoded_value_pair_with_key_specific_secret(
        &self,
        pair: &KeyEncodedValuePair,
        key_specific_secret: Option<&KeySpecificSecret>,
    ) -> StdResult<Hash>;
}
