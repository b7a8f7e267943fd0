//! Forgetting overlay over a persisted counter.
//!
//! Occurrences registered through [`ForgettingOverlay::uncount`] are counted
//! into a private in-memory trie and subtracted from the persisted counts on
//! every query. The persisted file is never touched.
//!
//! Only one forgetting generation is tracked: any call to `count` or
//! `count_batch` starts a fresh one and drops every earlier exclusion.
//! Successor rankings are served by the persisted counter as they are and do
//! not reflect forgotten occurrences.

use std::sync::Arc;

use crate::counter::PersistedCounter;
use crate::counts::{Counts, NgramCounts, TokenId};
use crate::error::Result;
use crate::trie::TrieCounter;

/// Per-session view of a [`PersistedCounter`] with some occurrences excluded.
pub struct ForgettingOverlay {
    persisted: Arc<PersistedCounter>,
    forgotten: TrieCounter,
}

impl ForgettingOverlay {
    pub fn wrap(persisted: Arc<PersistedCounter>) -> Self {
        Self {
            persisted,
            forgotten: TrieCounter::new(),
        }
    }

    pub fn persisted(&self) -> &PersistedCounter {
        &self.persisted
    }

    /// Starts a new forgetting generation.
    pub fn count(&mut self, _sequence: &[TokenId]) {
        self.reset();
    }

    pub fn count_batch<I, S>(&mut self, _sequences: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[TokenId]>,
    {
        self.reset();
    }

    /// Excludes one occurrence of `sequence` from the reported counts.
    pub fn uncount(&mut self, sequence: &[TokenId]) {
        self.forgotten.count(sequence);
    }

    pub fn uncount_batch<I, S>(&mut self, sequences: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[TokenId]>,
    {
        self.forgotten.count_batch(sequences);
    }

    pub fn get_count(&self) -> i64 {
        (self.persisted.get_count() - self.forgotten.total_count()).max(0)
    }

    pub fn get_counts(&self, sequence: &[TokenId]) -> Result<Counts> {
        let persisted = self.persisted.get_counts(sequence)?;
        Ok(persisted.forget(self.forgotten.counts(sequence)))
    }

    pub fn get_top_successors(&self, sequence: &[TokenId], limit: usize) -> Result<Vec<TokenId>> {
        self.persisted.get_top_successors(sequence, limit)
    }

    fn reset(&mut self) {
        if !self.forgotten.is_empty() {
            log::debug!(
                "Dropping {} forgotten occurrences",
                self.forgotten.total_count()
            );
        }
        self.forgotten = TrieCounter::new();
    }
}

impl NgramCounts for ForgettingOverlay {
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
    use crate::counter::deserialize;
    use crate::writer::serialize;
    use tempfile::{tempdir, TempDir};

    fn persisted(sequences: &[&[TokenId]]) -> (TempDir, Arc<PersistedCounter>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        let mut trie = TrieCounter::new();
        trie.count_batch(sequences);
        serialize(&path, &trie).unwrap();
        let counter = deserialize(&path).unwrap();
        (dir, Arc::new(counter))
    }

    #[test]
    fn test_counts_clamp_at_zero() {
        let (_dir, counter) = persisted(&[&[7], &[7], &[7]]);
        let mut overlay = ForgettingOverlay::wrap(counter);
        assert_eq!(overlay.get_counts(&[7]).unwrap(), Counts::new(0, 3));

        for _ in 0..5 {
            overlay.uncount(&[7]);
        }
        assert_eq!(overlay.get_counts(&[7]).unwrap(), Counts::new(0, 0));
        assert_eq!(overlay.get_count(), 0);
    }

    #[test]
    fn test_uncount_subtracts_along_the_path() {
        let (_dir, counter) = persisted(&[&[1, 2], &[1, 3], &[1, 3]]);
        let mut overlay = ForgettingOverlay::wrap(counter);
        overlay.uncount(&[1, 3]);

        assert_eq!(overlay.get_count(), 2);
        assert_eq!(overlay.get_counts(&[1]).unwrap(), Counts::new(1, 2));
        assert_eq!(overlay.get_counts(&[1, 3]).unwrap(), Counts::new(0, 1));
        assert_eq!(overlay.get_counts(&[1, 2]).unwrap(), Counts::new(0, 1));
        // rankings ignore the overlay
        assert_eq!(overlay.get_top_successors(&[1], 2).unwrap(), vec![3, 2]);
    }

    #[test]
    fn test_batch_count_resets_forgotten() {
        let (_dir, counter) = persisted(&[&[1], &[2], &[3]]);
        let mut overlay = ForgettingOverlay::wrap(counter);
        overlay.uncount(&[1]);
        overlay.uncount(&[2]);
        assert_eq!(overlay.get_count(), 1);
        assert_eq!(overlay.get_counts(&[1]).unwrap(), Counts::default());

        overlay.count_batch([[3]]);
        assert_eq!(overlay.get_count(), 3);
        assert_eq!(overlay.get_counts(&[1]).unwrap(), Counts::new(0, 1));
        assert_eq!(overlay.get_counts(&[2]).unwrap(), Counts::new(0, 1));
    }

    #[test]
    fn test_single_count_resets_forgotten() {
        let (_dir, counter) = persisted(&[&[1], &[2], &[3]]);
        let mut overlay = ForgettingOverlay::wrap(counter);
        overlay.uncount(&[1]);
        assert_eq!(overlay.get_count(), 2);
        assert_eq!(overlay.get_counts(&[1]).unwrap(), Counts::default());

        overlay.count(&[9]);
        assert_eq!(overlay.get_count(), 3);
        assert_eq!(overlay.get_counts(&[1]).unwrap(), Counts::new(0, 1));
        assert_eq!(overlay.get_counts(&[9]).unwrap(), Counts::default());
    }

    #[test]
    fn test_sessions_are_independent() {
        let (_dir, counter) = persisted(&[&[4, 5], &[4, 6]]);
        std::thread::scope(|scope| {
            for token in [5, 6] {
                let counter = Arc::clone(&counter);
                scope.spawn(move || {
                    let mut overlay = ForgettingOverlay::wrap(counter);
                    overlay.uncount_batch([[4, token]]);
                    assert_eq!(overlay.get_counts(&[4]).unwrap(), Counts::new(1, 1));
                    assert_eq!(overlay.get_counts(&[4, token]).unwrap(), Counts::new(0, 0));
                });
            }
        });
        assert_eq!(counter.get_counts(&[4]).unwrap(), Counts::new(2, 2));
    }
}
