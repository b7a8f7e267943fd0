//! Count aggregates shared by the in-memory trie, the persisted counter and
//! the forgetting overlay.
//!
//! # Tail arrays
//!
//! A context that was only ever followed by one unbranched continuation is
//! stored as a flat array `[count, t1, t2, ..., tk]` instead of a chain of
//! nodes. Matching a query against such an array means checking that the
//! remaining query tokens are a prefix of `t1..tk`; whatever is left of the
//! array after the match is the continuation of the queried context.

use crate::error::Result;

/// Dense integer id of a vocabulary token.
pub type TokenId = i32;

/// Reserved token id marking an unused dense slot.
pub const EMPTY_SLOT: TokenId = TokenId::MAX;

/// Aggregate statistic stored at every trie node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Counts {
    /// Number of live successor edges.
    pub distinct_successors: i32,
    /// Occurrences counted through the node, its own included.
    pub total_count: i32,
}

impl Counts {
    pub fn new(distinct_successors: i32, total_count: i32) -> Self {
        Self {
            distinct_successors,
            total_count,
        }
    }

    /// Elementwise subtraction clamped at zero.
    pub fn forget(self, other: Counts) -> Counts {
        Counts {
            distinct_successors: (self.distinct_successors - other.distinct_successors).max(0),
            total_count: (self.total_count - other.total_count).max(0),
        }
    }
}

impl From<Counts> for (i32, i32) {
    fn from(counts: Counts) -> Self {
        (counts.distinct_successors, counts.total_count)
    }
}

/// Read-only n-gram queries answered by every counter in this crate.
pub trait NgramCounts {
    /// Total number of occurrences counted at the root.
    fn total_count(&self) -> Result<i64>;

    /// Aggregate of the context `sequence`; zero when it was never counted.
    fn counts(&self, sequence: &[TokenId]) -> Result<Counts>;

    /// Successors of `sequence`, most frequent first, at most `limit` of them.
    fn top_successors(&self, sequence: &[TokenId], limit: usize) -> Result<Vec<TokenId>>;
}

/// Matches `remaining` query tokens against a tail array and returns the part
/// of the continuation left after them.
pub(crate) fn tail_suffix<'a>(tail: &'a [TokenId], remaining: &[TokenId]) -> Option<&'a [TokenId]> {
    let continuation = tail.get(1..)?;
    continuation
        .starts_with(remaining)
        .then(|| &continuation[remaining.len()..])
}

/// Whether the tail ends exactly after `remaining`.
pub(crate) fn tail_matches_exactly(tail: &[TokenId], remaining: &[TokenId]) -> bool {
    tail.get(1..) == Some(remaining)
}

/// Counts of a context that ends inside a tail array.
pub(crate) fn tail_counts(count: i32, rest: &[TokenId]) -> Counts {
    Counts::new(i32::from(!rest.is_empty()), count)
}

pub(crate) fn tail_top_successor(rest: &[TokenId], limit: usize) -> Vec<TokenId> {
    rest.first()
        .filter(|_| limit > 0)
        .copied()
        .into_iter()
        .collect()
}
