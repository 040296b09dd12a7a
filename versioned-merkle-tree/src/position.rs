//! Tree coordinates.
//!
//! A [Position] is the integer whose binary representation is a sentinel `1` followed by one
//! `bits_per_index` wide symbol per level, the symbol being the index of the child descended
//! into at that level. The root is `1`.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};
use std::fmt::{Debug, Formatter};

use crate::{ChildIndex, Key};

/// Coordinate of a node in the tree.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(BigUint);

impl Position {
    /// Position of the root node
    pub fn root() -> Self {
        Self(BigUint::one())
    }

    /// Whether this is the root position
    pub fn is_root(&self) -> bool {
        self.0.bits() < 2
    }

    /// Position of the `index`-th child, `index` must be lower than `2^bits_per_index`
    pub fn child(&self, bits_per_index: u8, index: ChildIndex) -> Self {
        debug_assert!(u32::from(bits_per_index) >= 64 || index < (1 << bits_per_index));
        Self((&self.0 << bits_per_index) | BigUint::from(index))
    }

    /// Position of the parent, `None` for the root
    pub fn parent(&self, bits_per_index: u8) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        Some(Self(&self.0 >> bits_per_index))
    }

    /// Index of this position among the children of its parent (0 for the root)
    pub fn child_index(&self, bits_per_index: u8) -> ChildIndex {
        if self.is_root() {
            return 0;
        }
        let mask = (BigUint::one() << bits_per_index) - BigUint::one();

        (&self.0 & mask).to_u64().unwrap_or_default()
    }

    /// The other children of the parent of this position, ordered by child index, along with
    /// the parent itself. `None` for the root.
    pub fn siblings(&self, bits_per_index: u8) -> Option<(Self, Vec<Self>)> {
        let parent = self.parent(bits_per_index)?;
        let own_index = self.child_index(bits_per_index);
        let siblings = (0..children_per_node(bits_per_index))
            .filter(|index| *index != own_index)
            .map(|index| parent.child(bits_per_index, index))
            .collect();

        Some((parent, siblings))
    }

    /// Depth of this position, the root being at level 0
    pub fn level(&self, bits_per_index: u8) -> usize {
        (self.0.bits() as usize - 1) / bits_per_index as usize
    }

    /// Ancestor of this position at the given level (itself at its own level), `None` if the
    /// level is deeper than this position.
    pub fn ancestor_at_level(&self, bits_per_index: u8, level: usize) -> Option<Self> {
        let own_level = self.level(bits_per_index);
        if level > own_level {
            return None;
        }

        Some(Self(&self.0 >> ((own_level - level) * bits_per_index as usize)))
    }

    /// Deepest position for a key: the key bits prefixed with the sentinel bit.
    ///
    /// Every position that [is an ancestor][Self::is_ancestor_of_key] of the key is a prefix
    /// of this one.
    pub fn deepest_for_key(key: &Key) -> Self {
        let sentinel = BigUint::one() << (key.len() * 8);

        Self(sentinel | BigUint::from_bytes_be(key))
    }

    /// Whether the bits of this position are a prefix of the deepest position of the key.
    ///
    /// Keys too short to reach this position's depth are never descendants.
    pub fn is_ancestor_of_key(&self, key: &Key) -> bool {
        let deepest = Self::deepest_for_key(key);
        let (own_bits, key_bits) = (self.0.bits(), deepest.0.bits());
        if own_bits > key_bits {
            return false;
        }

        (deepest.0 >> (key_bits - own_bits)) == self.0
    }

    /// Smallest key of the given length that descends from this position.
    pub fn min_key(&self, key_byte_length: usize) -> Key {
        let path_bits = self.0.bits() - 1;
        let path = &self.0 ^ (BigUint::one() << path_bits);
        let key_bits = (key_byte_length * 8) as u64;
        let value = if path_bits <= key_bits {
            path << (key_bits - path_bits)
        } else {
            path >> (path_bits - key_bits)
        };
        // `to_bytes_be` of zero is `[0]`, one byte too many for a zero length key
        let bytes = value.to_bytes_be();
        let bytes = &bytes[bytes.len().saturating_sub(key_byte_length)..];
        let mut key = vec![0u8; key_byte_length];
        key[key_byte_length - bytes.len()..].copy_from_slice(bytes);

        Key::new(key)
    }
}

/// Number of children of an interior node
pub(crate) fn children_per_node(bits_per_index: u8) -> u64 {
    1u64 << bits_per_index
}

/// Index of the child descended into at `level` (>= 1) on the path to `key`.
///
/// Reads the `level`-th `bits_per_index` wide symbol of the key, most significant bit first.
/// The key must be long enough to hold `level` symbols.
pub(crate) fn key_child_index_at_level(key: &[u8], bits_per_index: u8, level: usize) -> ChildIndex {
    let width = bits_per_index as usize;
    let start = (level - 1) * width;

    (start..start + width).fold(0, |index, bit| {
        let value = (key[bit / 8] >> (7 - bit % 8)) & 1;
        (index << 1) | ChildIndex::from(value)
    })
}

impl Debug for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Position({:#b})", self.0)
    }
}
