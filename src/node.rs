//! Persisted node representations.
//!
//! # Record layout
//!
//! Every record starts with a big-endian `i32` tag:
//!
//! ```text
//! tag == SPARSE_TAG (-1) | tag == DENSE_TAG (-2)
//!     child_count: i32
//!     distinct_successors: i32
//!     total_count: i32
//!     child_count x (token: i32, offset: i32)   most popular child first
//!
//! tag >= 0
//!     tag x i32                                 tail array [count, t1, ..., tk]
//! ```
//!
//! Nodes are decoded once into a tagged [`PersistedNode`]; child references
//! stay as [`NodeRef`] byte offsets and are resolved through the
//! [`NodeCache`] on demand.

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::cache::NodeCache;
use crate::counts::{tail_counts, tail_top_successor, Counts, TokenId, EMPTY_SLOT};
use crate::error::{CounterError, Result};

pub const SPARSE_TAG: i32 = -1;
pub const DENSE_TAG: i32 = -2;

/// Bytes of `distinct_successors` + `total_count` after the child count.
pub(crate) const NODE_COUNTS_LEN: usize = 8;
/// Bytes of one `(token, offset)` pair.
pub(crate) const EDGE_LEN: usize = 8;

/// Tables at least this long try the direct-index guess before searching.
const DIRECT_INDEX_MIN_SLOTS: usize = 1000;

/// Sparse nodes with more children than this keep their computed ranking.
const RANKING_MEMO_MIN_FANOUT: usize = 10;

/// Finds `key` in sorted `indices`, with the result convention of
/// [`slice::binary_search`].
///
/// Tables filled in vocabulary order hold id `k` at slot `k - 1`, so that
/// slot is checked first.
pub(crate) fn find_slot(indices: &[TokenId], key: TokenId) -> std::result::Result<usize, usize> {
    if indices.len() > DIRECT_INDEX_MIN_SLOTS && key > 0 {
        let guess = key as usize - 1;
        if indices.get(guess) == Some(&key) {
            return Ok(guess);
        }
    }
    indices.binary_search(&key)
}

/// Byte offset of a record in a counter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u32);

impl NodeRef {
    pub(crate) fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> u64 {
        u64::from(self.0)
    }
}

/// A decoded record.
#[derive(Debug)]
pub enum PersistedNode {
    Sparse(SparseNode),
    Dense(DenseNode),
    /// Tail array `[count, t1, ..., tk]`.
    Leaf(Vec<TokenId>),
}

impl PersistedNode {
    /// Decodes a trie node body: the counts followed by `child_count` edges.
    pub(crate) fn decode_node(
        at: NodeRef,
        tag: i32,
        child_count: usize,
        body: &[u8],
        payload_end: u64,
    ) -> Result<Self> {
        let words = read_words(body);
        let (counts, edges) = match words.as_slice() {
            [distinct, total, edges @ ..] if edges.len() == child_count * 2 => {
                (Counts::new(*distinct, *total), edges)
            }
            _ => return Err(CounterError::format(at.offset(), "node body has the wrong length")),
        };

        let mut pairs = Vec::with_capacity(child_count);
        for pair in edges.chunks_exact(2) {
            let (token, offset) = (pair[0], pair[1]);
            if offset < 0 || offset as u64 >= payload_end {
                return Err(CounterError::format(
                    at.offset(),
                    format!("child offset {offset} out of bounds"),
                ));
            }
            pairs.push((token, NodeRef::new(offset as u32)));
        }

        match tag {
            SPARSE_TAG => SparseNode::new(at, counts, pairs).map(PersistedNode::Sparse),
            DENSE_TAG => DenseNode::new(at, counts, pairs).map(PersistedNode::Dense),
            other => Err(CounterError::format(at.offset(), format!("unknown node tag {other}"))),
        }
    }

    pub(crate) fn decode_leaf(at: NodeRef, body: &[u8]) -> Result<Self> {
        let tail = read_words(body);
        if tail.is_empty() {
            return Err(CounterError::format(at.offset(), "empty tail array"));
        }
        Ok(PersistedNode::Leaf(tail))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PersistedNode::Leaf(_))
    }

    pub fn counts(&self) -> Counts {
        match self {
            PersistedNode::Sparse(node) => node.counts,
            PersistedNode::Dense(node) => node.counts,
            PersistedNode::Leaf(tail) => match tail.split_first() {
                Some((&count, rest)) => tail_counts(count, rest),
                None => Counts::default(),
            },
        }
    }

    pub fn count(&self) -> i32 {
        self.counts().total_count
    }

    /// Child reference for `token`; tail arrays have no children.
    pub fn successor(&self, token: TokenId) -> Option<NodeRef> {
        match self {
            PersistedNode::Sparse(node) => node.successor(token),
            PersistedNode::Dense(node) => node.successor(token),
            PersistedNode::Leaf(_) => None,
        }
    }

    /// Children in persisted order.
    pub fn successors(&self) -> &[(TokenId, NodeRef)] {
        match self {
            PersistedNode::Sparse(node) => &node.edges,
            PersistedNode::Dense(node) => &node.ranked,
            PersistedNode::Leaf(_) => &[],
        }
    }

    pub fn top_successors(&self, limit: usize, cache: &NodeCache) -> Result<Vec<TokenId>> {
        match self {
            PersistedNode::Sparse(node) => node.top_successors(limit, cache),
            PersistedNode::Dense(node) => Ok(node.top_successors(limit)),
            PersistedNode::Leaf(tail) => {
                let rest = tail.get(1..).unwrap_or_default();
                Ok(tail_top_successor(rest, limit))
            }
        }
    }
}

fn read_words(body: &[u8]) -> Vec<i32> {
    body.chunks_exact(4)
        .map(|word| i32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        .collect()
}

#[derive(Debug)]
struct Ranking {
    fingerprint: Counts,
    order: Vec<TokenId>,
}

/// Hash-based node; the children's ranking is computed on first use.
#[derive(Debug)]
pub struct SparseNode {
    counts: Counts,
    edges: Vec<(TokenId, NodeRef)>,
    index: AHashMap<TokenId, NodeRef>,
    ranking: Mutex<Option<Ranking>>,
}

impl SparseNode {
    fn new(at: NodeRef, counts: Counts, edges: Vec<(TokenId, NodeRef)>) -> Result<Self> {
        let mut index = AHashMap::with_capacity(edges.len());
        for &(token, child) in &edges {
            if index.insert(token, child).is_some() {
                return Err(CounterError::format(
                    at.offset(),
                    format!("duplicate token id {token}"),
                ));
            }
        }
        Ok(Self {
            counts,
            edges,
            index,
            ranking: Mutex::new(None),
        })
    }

    pub fn successor(&self, token: TokenId) -> Option<NodeRef> {
        self.index.get(&token).copied()
    }

    /// Ranks the children by their materialized counts, ties in persisted
    /// order.
    pub fn top_successors(&self, limit: usize, cache: &NodeCache) -> Result<Vec<TokenId>> {
        if let Some(ranking) = self.ranking.lock().as_ref() {
            if ranking.fingerprint == self.counts {
                return Ok(ranking.order.iter().take(limit).copied().collect());
            }
        }

        let mut ranked = Vec::with_capacity(self.edges.len());
        for &(token, child) in &self.edges {
            let count = cache.get_untracked(child)?.count();
            if count > 0 {
                ranked.push((token, count));
            }
        }
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let order: Vec<TokenId> = ranked.into_iter().map(|(token, _)| token).collect();
        let top = order.iter().take(limit).copied().collect();

        if self.edges.len() > RANKING_MEMO_MIN_FANOUT {
            *self.ranking.lock() = Some(Ranking {
                fingerprint: self.counts,
                order,
            });
        }
        Ok(top)
    }
}

/// Array-based node: sorted `indices` (with one trailing [`EMPTY_SLOT`])
/// parallel to `offsets`, plus the children in persisted popularity order.
#[derive(Debug)]
pub struct DenseNode {
    counts: Counts,
    indices: Vec<TokenId>,
    offsets: Vec<NodeRef>,
    ranked: Vec<(TokenId, NodeRef)>,
}

impl DenseNode {
    fn new(at: NodeRef, counts: Counts, ranked: Vec<(TokenId, NodeRef)>) -> Result<Self> {
        let mut sorted = ranked.clone();
        sorted.sort_unstable_by_key(|&(token, _)| token);
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(CounterError::format(
                at.offset(),
                format!("duplicate token id {}", pair[0].0),
            ));
        }
        if sorted.last().is_some_and(|&(token, _)| token == EMPTY_SLOT) {
            return Err(CounterError::format(at.offset(), "reserved token id in dense node"));
        }

        let mut indices: Vec<TokenId> = sorted.iter().map(|&(token, _)| token).collect();
        indices.push(EMPTY_SLOT);
        let offsets = sorted.into_iter().map(|(_, child)| child).collect();
        Ok(Self {
            counts,
            indices,
            offsets,
            ranked,
        })
    }

    pub fn successor(&self, token: TokenId) -> Option<NodeRef> {
        let slot = find_slot(&self.indices, token).ok()?;
        self.offsets.get(slot).copied()
    }

    /// The persisted order is already most popular first.
    pub fn top_successors(&self, limit: usize) -> Vec<TokenId> {
        self.ranked.iter().take(limit).map(|&(token, _)| token).collect()
    }

    #[cfg(test)]
    fn searched_successor(&self, token: TokenId) -> Option<NodeRef> {
        let slot = self.indices.binary_search(&token).ok()?;
        self.offsets.get(slot).copied()
    }
}
