use ngram_counter::{deserialize, serialize, TokenId, TrieCounter, TrieOptions};
use proptest::prelude::*;
use tempfile::tempdir;

fn sequences() -> impl Strategy<Value = Vec<Vec<TokenId>>> {
    prop::collection::vec(prop::collection::vec(0..12i32, 0..6), 1..40)
}

fn options() -> impl Strategy<Value = TrieOptions> {
    (0usize..4, 2usize..16).prop_map(|(sparse_levels, max_dense_slots)| TrieOptions {
        sparse_levels,
        max_dense_slots,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_persisted_counts_match_trie(sequences in sequences(), options in options()) {
        let mut trie = TrieCounter::with_options(options);
        trie.count_batch(&sequences);

        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        serialize(&path, &trie).unwrap();
        let counter = deserialize(&path).unwrap();

        prop_assert_eq!(counter.get_count(), trie.total_count());
        for sequence in &sequences {
            for end in 0..=sequence.len() {
                let prefix = &sequence[..end];
                prop_assert_eq!(counter.get_counts(prefix).unwrap(), trie.counts(prefix));
                prop_assert_eq!(
                    counter.get_top_successors(prefix, 3).unwrap(),
                    trie.top_successors(prefix, 3)
                );
            }
        }
    }

    #[test]
    fn test_uncount_restores_counts(sequences in sequences(), removed in 0usize..40) {
        let mut trie = TrieCounter::new();
        trie.count_batch(&sequences);
        let before = trie.clone();

        let extra = &sequences[removed % sequences.len()];
        trie.count(extra);
        prop_assert!(trie.uncount(extra));

        prop_assert_eq!(trie.total_count(), before.total_count());
        for sequence in &sequences {
            for end in 0..=sequence.len() {
                let prefix = &sequence[..end];
                prop_assert_eq!(trie.counts(prefix), before.counts(prefix));
            }
        }
    }
}
