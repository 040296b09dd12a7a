//! Canonical CBOR encoding.
//!
//! Values are converted to a [ciborium::Value] tree whose map entries are then sorted by the
//! bytes of their encoded keys (the core deterministic encoding of RFC 8949), so that two
//! logically equal values always produce the same bytes.

use anyhow::{Context, anyhow};
use ciborium::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::StdResult;

/// Serialize a value with the canonical CBOR encoding.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StdResult<Vec<u8>> {
    let value = Value::serialized(value).map_err(|e| anyhow!("{e:?}"))?;
    let value = canonicalize(value)?;

    to_bytes(&value).with_context(|| "Canonical encoding failed")
}

/// Deserialize a value encoded with [encode].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StdResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| anyhow!("{e:?}"))
        .with_context(|| "Canonical decoding failed")
}

fn to_bytes(value: &Value) -> StdResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| anyhow!("{e:?}"))?;

    Ok(bytes)
}

fn canonicalize(value: Value) -> StdResult<Value> {
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<StdResult<_>>()?,
        )),
        Value::Tag(tag, inner) => Ok(Value::Tag(tag, Box::new(canonicalize(*inner)?))),
        Value::Map(entries) => {
            let mut entries = entries
                .into_iter()
                .map(|(key, value)| {
                    let key = canonicalize(key)?;
                    Ok((to_bytes(&key)?, key, canonicalize(value)?))
                })
                .collect::<StdResult<Vec<_>>>()?;
            entries.sort_by(|(left, ..), (right, ..)| left.cmp(right));
            if entries.windows(2).any(|pair| pair[0].0 == pair[1].0) {
                return Err(anyhow!("Duplicated map key in canonical encoding"));
            }

            Ok(Value::Map(
                entries
                    .into_iter()
                    .map(|(_, key, value)| (key, value))
                    .collect(),
            ))
        }
        other => Ok(other),
    }
}
