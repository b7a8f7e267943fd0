//! Read-only counter backed by a serialized trie.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use crate::cache::NodeCache;
use crate::config::CounterConfig;
use crate::counts::{tail_counts, tail_suffix, tail_top_successor, Counts, NgramCounts, TokenId};
use crate::error::{CounterError, Result};
use crate::node::{NodeRef, PersistedNode};

/// Opens the counter at `path` with the default configuration.
pub fn deserialize(path: &Path) -> Result<PersistedCounter> {
    PersistedCounter::open(path)
}

/// Resolved context in a persisted counter.
enum View {
    Node(Arc<PersistedNode>),
    Tail { count: i32, rest: Vec<TokenId> },
}

pub struct PersistedCounter {
    root_ref: NodeRef,
    root: Arc<PersistedNode>,
    cache: NodeCache,
}

impl PersistedCounter {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &CounterConfig::default())
    }

    pub fn open_with(path: &Path, config: &CounterConfig) -> Result<Self> {
        let cache = NodeCache::open(path, config.cache_capacity)?;
        let root_ref = cache.root_ref()?;
        let root = Arc::new(cache.read(root_ref)?);
        if root.is_leaf() {
            return Err(CounterError::format(
                root_ref.offset(),
                "root record is not a trie node",
            ));
        }
        cache.pin(root_ref, Arc::clone(&root));

        let counter = Self {
            root_ref,
            root,
            cache,
        };
        let pinned = counter.prepare_cache(config.prepare_depth)?;
        log::info!(
            "Opened counter {} ({} occurrences, {pinned} nodes pinned)",
            path.display(),
            counter.get_count()
        );
        Ok(counter)
    }

    /// Pins every node down to `depth` levels below the root.
    fn prepare_cache(&self, depth: usize) -> Result<usize> {
        let mut pinned = 1;
        let mut frontier = VecDeque::from([(Arc::clone(&self.root), 0)]);
        while let Some((node, level)) = frontier.pop_front() {
            if level >= depth {
                continue;
            }
            for &(_, child) in node.successors() {
                let decoded = Arc::new(self.cache.read(child)?);
                self.cache.pin(child, Arc::clone(&decoded));
                pinned += 1;
                if !decoded.is_leaf() {
                    frontier.push_back((decoded, level + 1));
                }
            }
        }
        log::debug!("Pinned {pinned} nodes down to depth {depth}");
        Ok(pinned)
    }

    pub fn path(&self) -> &Path {
        self.cache.path()
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub fn root_ref(&self) -> NodeRef {
        self.root_ref
    }

    pub fn root(&self) -> &PersistedNode {
        &self.root
    }

    pub fn node(&self, node: NodeRef) -> Result<Arc<PersistedNode>> {
        self.cache.get(node)
    }

    pub fn get_count(&self) -> i64 {
        i64::from(self.root.count())
    }

    pub fn get_counts(&self, sequence: &[TokenId]) -> Result<Counts> {
        Ok(match self.resolve(sequence)? {
            Some(View::Node(node)) => node.counts(),
            Some(View::Tail { count, rest }) => tail_counts(count, &rest),
            None => Counts::default(),
        })
    }

    pub fn get_top_successors(&self, sequence: &[TokenId], limit: usize) -> Result<Vec<TokenId>> {
        match self.resolve(sequence)? {
            Some(View::Node(node)) => node.top_successors(limit, &self.cache),
            Some(View::Tail { rest, .. }) => Ok(tail_top_successor(&rest, limit)),
            None => Ok(Vec::new()),
        }
    }

    fn resolve(&self, sequence: &[TokenId]) -> Result<Option<View>> {
        let mut node = Arc::clone(&self.root);
        for (index, &token) in sequence.iter().enumerate() {
            let Some(child) = node.successor(token) else {
                return Ok(None);
            };
            node = self.cache.get(child)?;
            if let PersistedNode::Leaf(tail) = node.as_ref() {
                return Ok(tail_suffix(tail, &sequence[index + 1..]).map(|rest| View::Tail {
                    count: tail[0],
                    rest: rest.to_vec(),
                }));
            }
        }
        Ok(Some(View::Node(node)))
    }
}

impl NgramCounts for PersistedCounter {
    fn total_count(&self) -> Result<i64> {
        Ok(self.get_count())
    }

    fn counts(&self, sequence: &[TokenId]) -> Result<Counts> {
        self.get_counts(sequence)
    }

    fn top_successors(&self, sequence: &[TokenId], limit: usize) -> Result<Vec<TokenId>> {
        self.get_top_successors(sequence, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::{TrieCounter, TrieOptions};
    use crate::writer::serialize;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn persist(trie: &TrieCounter) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        serialize(&path, trie).unwrap();
        (dir, path)
    }

    fn sample_trie(options: TrieOptions) -> TrieCounter {
        let mut trie = TrieCounter::with_options(options);
        trie.train(&[1, 2, 3, 1, 2, 4, 5, 1, 2, 3], 3);
        trie.count(&[9, 8, 7, 6]);
        trie
    }

    fn assert_same_counts(trie: &TrieCounter, counter: &PersistedCounter) {
        let queries: &[&[TokenId]] = &[
            &[],
            &[1],
            &[1, 2],
            &[1, 2, 3],
            &[1, 2, 4],
            &[2, 4, 5],
            &[9],
            &[9, 8],
            &[9, 8, 7, 6],
            &[9, 8, 6],
            &[42],
        ];
        assert_eq!(counter.get_count(), trie.total_count());
        for &query in queries {
            assert_eq!(counter.get_counts(query).unwrap(), trie.counts(query), "{query:?}");
            assert_eq!(
                counter.get_top_successors(query, 3).unwrap(),
                trie.top_successors(query, 3),
                "{query:?}"
            );
        }
    }

    #[test]
    fn test_round_trip_sparse_and_dense() {
        for options in [
            TrieOptions::default(),
            TrieOptions {
                sparse_levels: 0,
                max_dense_slots: usize::MAX,
            },
        ] {
            let trie = sample_trie(options);
            let (_dir, path) = persist(&trie);
            let counter = deserialize(&path).unwrap();
            assert_same_counts(&trie, &counter);
        }
    }

    #[test]
    fn test_top_successors_with_tied_counts() {
        let mut trie = TrieCounter::new();
        for (token, times) in [(10, 5), (20, 9), (30, 2), (40, 9)] {
            for _ in 0..times {
                trie.count(&[1, token]);
            }
        }
        let (_dir, path) = persist(&trie);
        let counter = deserialize(&path).unwrap();
        assert_eq!(counter.get_top_successors(&[1], 2).unwrap(), vec![20, 40]);
        assert_eq!(counter.get_top_successors(&[1], 0).unwrap(), Vec::<TokenId>::new());
        assert_eq!(counter.get_counts(&[1]).unwrap(), Counts::new(4, 25));
    }

    #[test]
    fn test_prepare_depth_pins_levels() {
        let mut trie = TrieCounter::new();
        trie.count(&[1, 2]);
        trie.count(&[1, 3]);
        trie.count(&[4]);
        let (_dir, path) = persist(&trie);

        let shallow = CounterConfig {
            prepare_depth: 0,
            ..CounterConfig::default()
        };
        let counter = PersistedCounter::open_with(&path, &shallow).unwrap();
        assert_eq!(counter.cache().stats().pinned, 1);

        let one_level = CounterConfig {
            prepare_depth: 1,
            ..CounterConfig::default()
        };
        let counter = PersistedCounter::open_with(&path, &one_level).unwrap();
        assert_eq!(counter.cache().stats().pinned, 3);

        let counter = deserialize(&path).unwrap();
        assert_eq!(counter.cache().stats().pinned, 5);
        counter.get_counts(&[1, 3]).unwrap();
        assert_eq!(counter.cache().stats().misses, 0);
    }

    #[test]
    fn test_concurrent_reads_agree() {
        let trie = sample_trie(TrieOptions::default());
        let (_dir, path) = persist(&trie);
        let config = CounterConfig {
            cache_capacity: 2,
            prepare_depth: 0,
            ..CounterConfig::default()
        };
        let counter = PersistedCounter::open_with(&path, &config).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        assert_same_counts(&trie, &counter);
                    }
                });
            }
        });
        assert!(counter.cache().stats().evictions > 0);
    }

    #[test]
    fn test_open_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            deserialize(&dir.path().join("missing.bin")),
            Err(CounterError::Io(_))
        ));

        // a file whose root points at a tail array
        let path = dir.path().join("leaf-root.bin");
        let words: Vec<u8> = [1, 5, 0].iter().flat_map(|w: &i32| w.to_be_bytes()).collect();
        std::fs::write(&path, words).unwrap();
        assert!(matches!(deserialize(&path), Err(CounterError::Format { .. })));
    }
}
