use std::collections::BTreeMap;

use versioned_merkle_tree::{Key, KeyValuePair};

/// Copy of `pairs` where every `modulo`-th record gets a new value tagged with `tag`
pub fn update_some_values(
    pairs: &[KeyValuePair<String>],
    modulo: usize,
    tag: &str,
) -> Vec<KeyValuePair<String>> {
    pairs
        .iter()
        .enumerate()
        .map(|(index, pair)| {
            let mut pair = pair.clone();
            if index % modulo == 0 {
                pair.value = format!("{}-{tag}", pair.value);
            }
            pair
        })
        .collect()
}

/// Sorted union of two record sets, values of `newer` win
pub fn merge_pairs(
    older: &[KeyValuePair<String>],
    newer: &[KeyValuePair<String>],
) -> Vec<KeyValuePair<String>> {
    let mut merged: BTreeMap<Key, String> = older
        .iter()
        .map(|pair| (pair.key.clone(), pair.value.clone()))
        .collect();
    merged.extend(newer.iter().map(|pair| (pair.key.clone(), pair.value.clone())));

    merged
        .into_iter()
        .map(|(key, value)| KeyValuePair { key, value })
        .collect()
}
