use anyhow::anyhow;

use crate::encoder::Encoder;
use crate::{Hash, Key, KeyEncodedValuePair, KeySpecificSecret, MasterSecret, Seqno, StdResult};

/// Deterministic test encoder without blinding: every "hash" is the hashed bytes themselves,
/// which makes tree contents readable in test failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEncoder;

impl Encoder for IdentityEncoder {
    const BLINDED: bool = false;

    fn hash_generic(&self, bytes: &[u8]) -> Hash {
        Hash::from(bytes)
    }

    fn generate_master_secret(&self, seqno: Seqno) -> StdResult<MasterSecret> {
        Err(anyhow!(
            "Master secret requested for seqno {seqno} from an encoder without blinding"
        ))
    }

    fn compute_key_specific_secret(
        &self,
        _master_secret: &MasterSecret,
        key: &Key,
    ) -> StdResult<KeySpecificSecret> {
        Err(anyhow!(
            "Key specific secret requested for key {key} from an encoder without blinding"
        ))
    }

    fn hash_key_encoded_value_pair_with_key_specific_secret(
        &self,
        pair: &KeyEncodedValuePair,
        _key_specific_secret: Option<&KeySpecificSecret>,
    ) -> StdResult<Hash> {
        self.encode_and_hash_generic(&(&pair.key, &pair.value))
    }
}

/// Deterministic test encoder with blinding.
///
/// The master secret of a version is its big endian seqno and a key specific secret is the
/// master secret followed by the key, so blinded trees can be compared across runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityBlindedEncoder;

impl Encoder for IdentityBlindedEncoder {
    const BLINDED: bool = true;

    fn hash_generic(&self, bytes: &[u8]) -> Hash {
        Hash::from(bytes)
    }

    fn generate_master_secret(&self, seqno: Seqno) -> StdResult<MasterSecret> {
        Ok(MasterSecret::from(seqno.to_be_bytes()))
    }

    fn compute_key_specific_secret(
        &self,
        master_secret: &MasterSecret,
        key: &Key,
    ) -> StdResult<KeySpecificSecret> {
        Ok(KeySpecificSecret::new([&master_secret[..], &key[..]].concat()))
    }

    fn hash_key_encoded_value_pair_with_key_specific_secret(
        &self,
        pair: &KeyEncodedValuePair,
        key_specific_secret: Option<&KeySpecificSecret>,
    ) -> StdResult<Hash> {
        let secret = key_specific_secret
            .ok_or_else(|| anyhow!("Missing key specific secret for key {}", pair.key))?;

        self.encode_and_hash_generic(&(secret, &pair.value))
    }
}
