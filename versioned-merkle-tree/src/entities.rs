use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use crate::{Position, StdResult};

/// Seqno identifies one committed version of the tree, `0` meaning "no version yet".
pub type Seqno = u64;

/// Selects one of the `children_per_node` children of an interior node.
pub type ChildIndex = u64;

macro_rules! bytes_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "serde_bytes")] Vec<u8>);

        impl $name {
            /// Wrap the given bytes
            pub fn new(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            /// Decode from a hex representation
            pub fn from_hex(hex: &str) -> StdResult<Self> {
                Ok(Self(hex::decode(hex)?))
            }

            /// Hex representation of the bytes
            pub fn to_hex(&self) -> String {
                hex::encode(&self.0)
            }

            /// Consume into the inner bytes
            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }
        }

        impl<const N: usize> From<[u8; N]> for $name {
            fn from(bytes: [u8; N]) -> Self {
                Self(bytes.to_vec())
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }
    };
}

bytes_newtype!(
    /// A digest computed by an [Encoder][crate::encoder::Encoder]; empty when absent.
    Hash
);
bytes_newtype!(
    /// Lookup key of a record, all keys of a tree have the same length.
    Key
);
bytes_newtype!(
    /// A value serialized with the canonical encoding of an encoder.
    EncodedValue
);
bytes_newtype!(
    /// Per-version blinding seed.
    MasterSecret
);
bytes_newtype!(
    /// Per-(version, key) secret derived from a [MasterSecret].
    KeySpecificSecret
);

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A record stored in the tree, the value type is chosen by the calling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair<V> {
    /// Key of the record
    pub key: Key,

    /// Plaintext value of the record
    pub value: V,
}

impl<V> KeyValuePair<V> {
    /// KeyValuePair factory
    pub fn new<K: Into<Key>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A record whose value has already been encoded, as handed to the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEncodedValuePair {
    /// Key of the record
    pub key: Key,

    /// Canonical encoding of the value
    pub value: EncodedValue,
}

/// Hash of a stored record, never carries the plaintext value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHashPair {
    /// Key of the record
    pub key: Key,

    /// Value commitment of the record
    pub hash: Hash,
}

/// Hash of the node stored at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionHashPair {
    /// Position of the node
    pub position: Position,

    /// Hash of the node
    pub hash: Hash,
}

#[repr(u8)]
enum NodeType {
    Interior = 1,
    Leaf = 2,
}

/// A node of the tree, as hashed.
///
/// Serialized as a `(type, content)` tuple so that interior and leaf nodes never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Child hashes indexed by [ChildIndex], absent children are empty hashes
    Interior(Vec<Hash>),

    /// Key hash pairs sorted by key
    Leaf(Vec<KeyHashPair>),
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        match self {
            Node::Interior(children) => {
                tuple.serialize_element(&(NodeType::Interior as u8))?;
                tuple.serialize_element(children)?;
            }
            Node::Leaf(pairs) => {
                tuple.serialize_element(&(NodeType::Leaf as u8))?;
                tuple.serialize_element(pairs)?;
            }
        }
        tuple.end()
    }
}

/// Per-version root summary, its hash is the root hash of the version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    /// Version this root commits to
    pub seqno: Seqno,

    /// Hash of the top node of the tree (empty for seqno 0 and inside proofs)
    pub bare_root_hash: Hash,
}

impl RootMetadata {
    /// Copy of this root without its bare root hash, as shipped inside proofs.
    pub fn without_hash(&self) -> Self {
        Self {
            seqno: self.seqno,
            bare_root_hash: Hash::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::encoder::{Encoder, IdentityEncoder};

    use super::*;

    #[test]
    fn bytes_newtype_hex_round_trip() {
        let hash = Hash::from_hex("00ff10").unwrap();

        assert_eq!(vec![0x00, 0xff, 0x10], hash.clone().into_bytes());
        assert_eq!("00ff10", hash.to_hex());
        assert_eq!("Hash(00ff10)", format!("{hash:?}"));
    }

    #[test]
    fn interior_and_leaf_nodes_never_encode_the_same() {
        let encoder = IdentityEncoder;
        let interior = encoder.encode(&Node::Interior(vec![])).unwrap();
        let leaf = encoder.encode(&Node::Leaf(vec![])).unwrap();

        assert_ne!(interior, leaf);
    }

    #[test]
    fn node_encoding_depends_on_child_order() {
        let encoder = IdentityEncoder;
        let a: Hash = [0x01, 0x02].into();
        let b: Hash = [0x03, 0x04].into();

        let node_ab = encoder
            .encode(&Node::Interior(vec![a.clone(), b.clone()]))
            .unwrap();
        let node_ba = encoder.encode(&Node::Interior(vec![b, a])).unwrap();

        assert_ne!(node_ab, node_ba);
    }

    #[test]
    fn root_metadata_without_hash_keeps_seqno() {
        let root = RootMetadata {
            seqno: 12,
            bare_root_hash: [1, 2, 3].into(),
        };

        assert_eq!(
            RootMetadata {
                seqno: 12,
                bare_root_hash: Hash::default()
            },
            root.without_hash()
        );
    }
}
