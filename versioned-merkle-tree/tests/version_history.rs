mod test_extensions;

use tokio_util::sync::CancellationToken;

use versioned_merkle_tree::encoder::{BlindedSha512_256Encoder, IdentityEncoder, Sha512_256Encoder};
use versioned_merkle_tree::{Config, Key, KeyValuePair, MerkleTreeError};

use versioned_merkle_tree::test_utils::random_sorted_pairs;

use test_extensions::{TreeTester, merge_pairs, merkle_tree_error, update_some_values};

#[tokio::test]
async fn older_versions_stay_readable_and_provable() {
    let config = Config::new(BlindedSha512_256Encoder, 2, 3, 4).unwrap();
    let mut tester = TreeTester::new(config, 2);
    let first = random_sorted_pairs(21, 80, 4);
    let second = merge_pairs(
        &update_some_values(&first, 3, "v2"),
        &random_sorted_pairs(22, 40, 4),
    );
    let third = update_some_values(&second, 5, "v3");

    assert_eq!(1, tester.build(&first).await);
    assert_eq!(2, tester.build(&second).await);
    assert_eq!(3, tester.build(&third).await);

    for (seqno, pairs) in [(1, &first), (2, &second), (3, &third)] {
        for pair in pairs.iter() {
            tester.assert_proved(seqno, pair).await;
        }
    }
}

#[tokio::test]
async fn key_added_later_is_absent_from_older_versions() {
    let config = Config::new(IdentityEncoder, 4, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 1);
    let first = random_sorted_pairs(31, 10, 2);
    let added = KeyValuePair::new(
        random_sorted_pairs(32, 1, 2)[0].key.clone(),
        "added".to_string(),
    );
    assert!(first.iter().all(|pair| pair.key != added.key));
    let second = merge_pairs(&first, std::slice::from_ref(&added));
    tester.build(&first).await;
    tester.build(&second).await;

    assert_eq!(
        MerkleTreeError::KeyNotFound,
        merkle_tree_error(tester.tree.get_value(1, &added.key).await)
    );
    assert_eq!("added", tester.tree.get_value(2, &added.key).await.unwrap());
}

#[tokio::test]
async fn lookups_outside_committed_versions_fail_with_invalid_seqno() {
    let config = Config::new(IdentityEncoder, 2, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 1);
    let pairs = random_sorted_pairs(41, 10, 2);
    let key = &pairs[0].key;

    assert!(matches!(
        merkle_tree_error(tester.tree.get_value(1, key).await),
        MerkleTreeError::InvalidSeqno { seqno: 1, .. }
    ));
    tester.build(&pairs).await;

    assert!(matches!(
        merkle_tree_error(tester.tree.get_value(0, key).await),
        MerkleTreeError::InvalidSeqno { seqno: 0, .. }
    ));
    assert!(matches!(
        merkle_tree_error(tester.tree.get_value(2, key).await),
        MerkleTreeError::InvalidSeqno { seqno: 2, .. }
    ));
    assert!(matches!(
        merkle_tree_error(tester.tree.get_root_hash(0).await),
        MerkleTreeError::InvalidSeqno { seqno: 0, .. }
    ));
    assert!(matches!(
        merkle_tree_error(tester.tree.get_root_hash(2).await),
        MerkleTreeError::InvalidSeqno { seqno: 2, .. }
    ));
}

#[tokio::test]
async fn never_inserted_key_is_not_found() {
    let config = Config::new(IdentityEncoder, 2, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 1);
    let pairs = random_sorted_pairs(51, 10, 2);
    tester.build(&pairs).await;
    let missing = (0..=u16::MAX)
        .map(|key| Key::from(key.to_be_bytes()))
        .find(|key| pairs.iter().all(|pair| &pair.key != key))
        .unwrap();

    assert_eq!(
        MerkleTreeError::KeyNotFound,
        merkle_tree_error(tester.tree.get_value(1, &missing).await)
    );
    assert_eq!(
        MerkleTreeError::KeyNotFound,
        merkle_tree_error(tester.tree.get_value_with_proof(1, &missing).await)
    );
}

#[tokio::test]
async fn unchecked_lookup_reads_past_the_latest_version() {
    let config = Config::new(IdentityEncoder, 2, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 1);
    let pairs = random_sorted_pairs(61, 10, 2);
    tester.build(&pairs).await;

    assert_eq!(
        pairs[4].value,
        tester
            .tree
            .get_value_unchecked(10, &pairs[4].key)
            .await
            .unwrap()
    );
    assert!(matches!(
        merkle_tree_error(tester.tree.get_value_unchecked(0, &pairs[4].key).await),
        MerkleTreeError::InvalidSeqno { seqno: 0, .. }
    ));
}

#[tokio::test]
async fn latest_root_follows_builds() {
    let config = Config::new(Sha512_256Encoder, 8, 4, 2).unwrap();
    let mut tester = TreeTester::new(config, 1);
    assert_eq!(None, tester.tree.get_latest_root().await.unwrap());

    let pairs = random_sorted_pairs(71, 30, 2);
    tester.build(&pairs).await;
    tester.build(&update_some_values(&pairs, 2, "v2")).await;

    let (root, root_hash) = tester.tree.get_latest_root().await.unwrap().unwrap();
    assert_eq!(2, root.seqno);
    assert_eq!(tester.root_hash(2), &root_hash);
    assert_eq!(
        tester.root_hash(1),
        &tester.tree.get_root_hash(1).await.unwrap()
    );
}

/// Every build must be given every key ever inserted: a key left out of a later version keeps
/// its stale value for lookups, and the stale nodes it leaves behind break the proofs of that
/// version.
#[tokio::test]
async fn key_omitted_from_a_later_version_breaks_its_proofs() {
    let config = Config::new(IdentityEncoder, 1, 1, 1).unwrap();
    let mut tester = TreeTester::new(config, 1);
    let kept = KeyValuePair::new([0x00], "kept".to_string());
    let omitted = KeyValuePair::new([0xff], "omitted".to_string());
    tester.build(&[kept.clone(), omitted.clone()]).await;
    tester.build(std::slice::from_ref(&kept)).await;

    assert_eq!(
        "omitted",
        tester.tree.get_value(2, &omitted.key).await.unwrap()
    );
    for pair in [&kept, &omitted] {
        let (_, proof) = tester
            .tree
            .get_value_with_proof(2, &pair.key)
            .await
            .unwrap();
        tester
            .verifier
            .verify_inclusion_proof(pair, &proof, tester.root_hash(2))
            .expect_err("Proofs of a version missing a key should not verify");
    }
    tester.assert_proved(1, &omitted).await;
}

#[tokio::test]
async fn blinding_hides_unchanged_values_across_versions() {
    async fn neighbour_hashes<E: versioned_merkle_tree::encoder::Encoder>(
        config: Config<E>,
    ) -> (Vec<u8>, Vec<u8>) {
        let mut tester = TreeTester::new(config, 1);
        let pairs = vec![
            KeyValuePair::new([0x01], "same".to_string()),
            KeyValuePair::new([0x02], "other".to_string()),
        ];
        tester.build(&pairs).await;
        tester.build(&pairs).await;

        let mut hashes = vec![];
        for seqno in 1..=2 {
            let (_, proof) = tester
                .tree
                .get_value_with_proof(seqno, &pairs[1].key)
                .await
                .unwrap();
            hashes.push(proof.other_pairs_in_leaf[0].hash.to_vec());
        }

        (hashes.remove(0), hashes.remove(0))
    }

    let (first, second) =
        neighbour_hashes(Config::new(BlindedSha512_256Encoder, 1, 2, 1).unwrap()).await;
    assert_ne!(first, second);

    let (first, second) = neighbour_hashes(Config::new(Sha512_256Encoder, 1, 2, 1).unwrap()).await;
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lookups_run_alongside_builds() {
    let config = Config::new(BlindedSha512_256Encoder, 4, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 2);
    let pairs = random_sorted_pairs(81, 100, 2);
    tester.build(&pairs).await;
    let tree = tester.tree.clone();

    let mut readers = vec![];
    for reader in 0..8 {
        let tree = tree.clone();
        let pair = pairs[reader * 10].clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                let (value, _proof) = tree.get_value_with_proof(1, &pair.key).await.unwrap();
                assert_eq!(pair.value, value);
            }
        }));
    }
    let writer = {
        let tree = tree.clone();
        let pairs = update_some_values(&pairs, 2, "v");
        tokio::spawn(async move {
            let mut seqnos = vec![];
            for _ in 0..5 {
                let (seqno, _) = tree
                    .build_new_version(&pairs, &CancellationToken::new())
                    .await
                    .unwrap();
                seqnos.push(seqno);
            }
            seqnos
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(vec![2, 3, 4, 5, 6], writer.await.unwrap());
    assert_eq!(
        vec![1, 2, 3, 4, 5, 6],
        tester.storage_engine.committed_seqnos().await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_builds_commit_distinct_provable_versions() {
    let config = Config::new(BlindedSha512_256Encoder, 4, 2, 2).unwrap();
    let mut tester = TreeTester::new(config, 2);
    let pairs = random_sorted_pairs(91, 60, 2);
    tester.build(&pairs).await;
    let builders = 6;

    let mut handles = vec![];
    for builder in 0..builders {
        let tree = tester.tree.clone();
        let pairs = update_some_values(&pairs, 2, &format!("builder-{builder}"));
        handles.push(tokio::spawn(async move {
            let (seqno, root_hash) = tree
                .build_new_version(&pairs, &CancellationToken::new())
                .await
                .unwrap();
            (seqno, root_hash, pairs)
        }));
    }
    let mut built = vec![];
    for handle in handles {
        built.push(handle.await.unwrap());
    }
    built.sort_by_key(|(seqno, _, _)| *seqno);

    assert_eq!(
        (2..=builders as u64 + 1).collect::<Vec<_>>(),
        built.iter().map(|(seqno, _, _)| *seqno).collect::<Vec<_>>()
    );
    for (seqno, root_hash, pairs) in &built {
        assert_eq!(root_hash, &tester.tree.get_root_hash(*seqno).await.unwrap());
        for pair in pairs {
            let (value, proof) = tester
                .tree
                .get_value_with_proof(*seqno, &pair.key)
                .await
                .unwrap();
            assert_eq!(pair.value, value);
            tester
                .verifier
                .verify_inclusion_proof(pair, &proof, root_hash)
                .unwrap();
        }
    }
    assert_eq!(
        (1..=builders as u64 + 1).collect::<Vec<_>>(),
        tester.storage_engine.committed_seqnos().await
    );
}
