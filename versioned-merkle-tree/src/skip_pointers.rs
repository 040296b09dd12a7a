//! Skip pointers between versions.
//!
//! Each seqno `s` points back to the running totals of the binary expansion of `s - 1`, taken
//! from its most significant bit down. Chaining them reaches any earlier seqno in a number of
//! hops logarithmic in the distance, which bounds the size of the proof that a tree evolved
//! consistently between two versions.
//!
//! These are integer functions only, they never touch a tree.

use std::collections::BTreeSet;

use crate::{MerkleTreeError, Seqno};

/// Seqnos that `seqno` points back to, strictly increasing and all lower than `seqno`.
///
/// ```
/// use versioned_merkle_tree::skip_pointers::skip_pointers_for_seqno;
///
/// assert_eq!(vec![4, 6], skip_pointers_for_seqno(7));
/// assert!(skip_pointers_for_seqno(1).is_empty());
/// ```
pub fn skip_pointers_for_seqno(seqno: Seqno) -> Vec<Seqno> {
    let Some(previous) = seqno.checked_sub(1) else {
        return vec![];
    };
    let mut pointers = Vec::with_capacity(previous.count_ones() as usize);
    let mut total = 0;
    for bit in (0..Seqno::BITS).rev() {
        let power = 1 << bit;
        if previous & power != 0 {
            total += power;
            pointers.push(total);
        }
    }

    pointers
}

/// Shortest chain of seqnos leading from `start` (excluded) to `end` (included) where each
/// seqno is a skip pointer of the next one.
///
/// `skip_path(s, s)` is `[s]`. Seqno 0 has no tree and is never a valid start.
pub fn skip_path(start: Seqno, end: Seqno) -> Result<Vec<Seqno>, MerkleTreeError> {
    if start == 0 || start > end {
        return Err(MerkleTreeError::InvalidSeqnoRange { start, end });
    }
    if start == end {
        return Ok(vec![end]);
    }

    let mut path = vec![];
    let mut frontier = end;
    while frontier > start {
        path.push(frontier);
        frontier = skip_pointers_for_seqno(frontier)
            .into_iter()
            .find(|pointer| *pointer >= start)
            // `frontier - 1` is always a pointer of `frontier`
            .unwrap_or(frontier - 1);
    }
    path.reverse();

    Ok(path)
}

/// Seqnos whose root hashes a verifier needs, on top of the ones along
/// [skip_path(start, end)][skip_path], to check every hop of that path.
///
/// Sorted, without `start` nor any seqno of the path.
pub fn root_hash_seqnos_needed_for_extension_proof(
    start: Seqno,
    end: Seqno,
) -> Result<Vec<Seqno>, MerkleTreeError> {
    let path = skip_path(start, end)?;
    let implied: BTreeSet<Seqno> = path.iter().copied().chain([start]).collect();
    let needed: BTreeSet<Seqno> = path
        .iter()
        .flat_map(|seqno| skip_pointers_for_seqno(*seqno))
        .filter(|seqno| !implied.contains(seqno))
        .collect();

    Ok(needed.into_iter().collect())
}
