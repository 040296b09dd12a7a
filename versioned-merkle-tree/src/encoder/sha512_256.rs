use anyhow::{Context, anyhow};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha512_256};

use crate::encoder::Encoder;
use crate::{Hash, Key, KeyEncodedValuePair, KeySpecificSecret, MasterSecret, Seqno, StdResult};

type HmacSha512_256 = Hmac<Sha512_256>;

/// Byte length of the generated master secrets
const MASTER_SECRET_LENGTH: usize = 32;

fn sha512_256(bytes: &[u8]) -> Hash {
    Hash::new(Sha512_256::digest(bytes).to_vec())
}

fn hmac_sha512_256(secret: &[u8], message: &[u8]) -> StdResult<Vec<u8>> {
    let mut mac =
        HmacSha512_256::new_from_slice(secret).map_err(|e| anyhow!("Invalid HMAC key: {e}"))?;
    mac.update(message);

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Production encoder with blinded value commitments.
///
/// Generic hash is SHA-512/256. Key specific secrets and value commitments are
/// HMAC-SHA-512/256, keyed respectively by the master secret and the key specific secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlindedSha512_256Encoder;

impl Encoder for BlindedSha512_256Encoder {
    const BLINDED: bool = true;

    fn hash_generic(&self, bytes: &[u8]) -> Hash {
        sha512_256(bytes)
    }

    fn generate_master_secret(&self, _seqno: Seqno) -> StdResult<MasterSecret> {
        let mut secret = vec![0u8; MASTER_SECRET_LENGTH];
        OsRng
            .try_fill_bytes(&mut secret)
            .with_context(|| "Could not generate master secret")?;

        Ok(MasterSecret::new(secret))
    }

    fn compute_key_specific_secret(
        &self,
        master_secret: &MasterSecret,
        key: &Key,
    ) -> StdResult<KeySpecificSecret> {
        Ok(KeySpecificSecret::new(hmac_sha512_256(master_secret, key)?))
    }

    fn hash_key_encoded_value_pair_with_key_specific_secret(
        &self,
        pair: &KeyEncodedValuePair,
        key_specific_secret: Option<&KeySpecificSecret>,
    ) -> StdResult<Hash> {
        let secret = key_specific_secret
            .ok_or_else(|| anyhow!("Missing key specific secret for key {}", pair.key))?;

        Ok(Hash::new(hmac_sha512_256(secret, &pair.value)?))
    }
}

/// Production encoder without blinding: a value commitment is the SHA-512/256 hash of the
/// canonical encoding of the `(key, encoded value)` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha512_256Encoder;

impl Encoder for Sha512_256Encoder {
    const BLINDED: bool = false;

    fn hash_generic(&self, bytes: &[u8]) -> Hash {
        sha512_256(bytes)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_256_known_answer() {
        // SHA-512/256("abc"), FIPS 180-4 example
        let expected =
            Hash::from_hex("53048e2681941ef99b2e29b76b4c7dabe4c2d0c634fc6d46e0e2f13107e7af23")
                .unwrap();

        assert_eq!(expected, Sha512_256Encoder.hash_generic(b"abc"));
        assert_eq!(expected, BlindedSha512_256Encoder.hash_generic(b"abc"));
    }

    #[test]
    fn master_secrets_are_fresh() {
        let encoder = BlindedSha512_256Encoder;
        let first = encoder.generate_master_secret(1).unwrap();
        let second = encoder.generate_master_secret(1).unwrap();

        assert_eq!(MASTER_SECRET_LENGTH, first.len());
        assert_ne!(first, second);
    }

    #[test]
    fn key_specific_secret_is_deterministic_and_per_key() {
        let encoder = BlindedSha512_256Encoder;
        let master_secret = MasterSecret::new(vec![7; MASTER_SECRET_LENGTH]);
        let key = Key::from([1, 2, 3]);

        let first = encoder
            .compute_key_specific_secret(&master_secret, &key)
            .unwrap();
        let second = encoder
            .compute_key_specific_secret(&master_secret, &key)
            .unwrap();
        let other = encoder
            .compute_key_specific_secret(&master_secret, &Key::from([1, 2, 4]))
            .unwrap();

        assert_eq!(32, first.len());
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn blinded_commitment_depends_on_value_and_secret() {
        let encoder = BlindedSha512_256Encoder;
        let secret = KeySpecificSecret::new(vec![1; 32]);
        let pair = |value: &[u8]| KeyEncodedValuePair {
            key: Key::from([0]),
            value: value.into(),
        };

        let commitment = encoder
            .hash_key_encoded_value_pair_with_key_specific_secret(&pair(b"a"), Some(&secret))
            .unwrap();
        let other_value = encoder
            .hash_key_encoded_value_pair_with_key_specific_secret(&pair(b"b"), Some(&secret))
            .unwrap();
        let other_secret = encoder
            .hash_key_encoded_value_pair_with_key_specific_secret(
                &pair(b"a"),
                Some(&KeySpecificSecret::new(vec![2; 32])),
            )
            .unwrap();

        assert_ne!(commitment, other_value);
        assert_ne!(commitment, other_secret);
    }
}
