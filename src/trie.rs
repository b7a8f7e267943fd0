//! In-memory counting trie.
//!
//! This is the mutable side of the counter: training builds one, the writer
//! serializes it, and every forgetting overlay owns a small one holding the
//! occurrences to exclude.
//!
//! # Node encodings
//!
//! Each node picks its own successor encoding:
//! - **Sparse**: a hash map from token id to successor plus the insertion
//!   order of the keys. Used near the root, where fan-out is large and ids
//!   arrive in arbitrary order.
//! - **Dense**: sorted parallel arrays of token ids and successors, padded
//!   with [`EMPTY_SLOT`]. Cheaper for the small fan-out of deep contexts.
//!   A dense node that grows past `max_dense_slots` is turned into a sparse
//!   one the next time a count passes through it.
//!
//! A successor that has only ever seen one continuation is kept as a tail
//! array (see [`crate::counts`]) and promoted to a node once a different
//! continuation shows up.
//!
//! # Usage
//!
//! ```rust
//! use ngram_counter::TrieCounter;
//!
//! let mut trie = TrieCounter::new();
//! trie.train(&[1, 2, 3, 1, 2, 4], 3);
//! assert_eq!(trie.counts(&[1, 2]).total_count, 2);
//! assert_eq!(trie.top_successors(&[1, 2], 2).len(), 2);
//! ```

use ahash::AHashMap;

use crate::counts::{
    tail_counts, tail_matches_exactly, tail_suffix, tail_top_successor, Counts, NgramCounts,
    TokenId, EMPTY_SLOT,
};
use crate::error::Result;
use crate::node::find_slot;
use crate::sequencer;

/// Slot growth factor of dense nodes.
const GROWTH_FACTOR: f64 = 1.5;

/// Shape parameters for newly created nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieOptions {
    /// Nodes at a depth below this are created sparse, deeper ones dense.
    pub sparse_levels: usize,
    /// Dense nodes holding more slots than this are promoted to sparse.
    pub max_dense_slots: usize,
}

impl Default for TrieOptions {
    fn default() -> Self {
        Self {
            sparse_levels: 3,
            max_dense_slots: 10,
        }
    }
}

impl TrieOptions {
    fn encoding_for(&self, depth: usize) -> Encoding {
        if depth < self.sparse_levels {
            Encoding::Sparse
        } else {
            Encoding::Dense
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Sparse,
    Dense,
}

/// Child of a trie node.
#[derive(Debug, Clone)]
pub enum Successor {
    Node(Box<TrieNode>),
    /// `[count, t1, ..., tk]`: one continuation seen `count` times.
    Tail(Vec<TokenId>),
}

impl Successor {
    fn tail(count: i32, continuation: &[TokenId]) -> Self {
        let mut tail = Vec::with_capacity(continuation.len() + 1);
        tail.push(count);
        tail.extend_from_slice(continuation);
        Successor::Tail(tail)
    }

    pub fn count(&self) -> i32 {
        match self {
            Successor::Node(node) => node.total_count,
            Successor::Tail(tail) => tail.first().copied().unwrap_or(0),
        }
    }

    /// Applies `adj` to the occurrence of `sequence` that continues below
    /// this successor; `index` is the position of the first token below it.
    fn adjust(&mut self, sequence: &[TokenId], index: usize, adj: i32, options: &TrieOptions) {
        let promoted = match self {
            Successor::Tail(tail) => {
                if tail_matches_exactly(tail, &sequence[index..]) {
                    tail[0] += adj;
                    None
                } else {
                    Some(TrieNode::from_tail(tail, index, options))
                }
            }
            Successor::Node(_) => None,
        };
        if let Some(node) = promoted {
            *self = Successor::Node(Box::new(node));
        }

        if let Successor::Node(node) = self {
            if node.dense_slots() > options.max_dense_slots {
                node.promote_to_sparse();
            }
            node.adjust(sequence, index, adj, options);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SparseEdges {
    map: AHashMap<TokenId, Successor>,
    order: Vec<TokenId>,
}

impl SparseEdges {
    fn from_dense(dense: DenseEdges) -> Self {
        let mut sparse = SparseEdges::default();
        for (token, successor) in dense.indices.into_iter().zip(dense.successors) {
            if token == EMPTY_SLOT {
                break;
            }
            if let Some(successor) = successor {
                sparse.insert(token, successor);
            }
        }
        sparse
    }

    fn insert(&mut self, token: TokenId, successor: Successor) {
        if self.map.insert(token, successor).is_none() {
            self.order.push(token);
        }
    }

    fn remove(&mut self, token: TokenId) {
        if self.map.remove(&token).is_some() {
            self.order.retain(|&t| t != token);
        }
    }

    fn iter(&self) -> impl Iterator<Item = (TokenId, &Successor)> + '_ {
        self.order
            .iter()
            .filter_map(|token| self.map.get(token).map(|successor| (*token, successor)))
    }
}

/// Sorted token ids with [`EMPTY_SLOT`] padding; the last slot is always free.
#[derive(Debug, Clone)]
pub(crate) struct DenseEdges {
    indices: Vec<TokenId>,
    successors: Vec<Option<Successor>>,
}

impl Default for DenseEdges {
    fn default() -> Self {
        Self {
            indices: vec![EMPTY_SLOT],
            successors: vec![None],
        }
    }
}

impl DenseEdges {
    pub(crate) fn slots(&self) -> usize {
        self.indices.len()
    }

    #[cfg(test)]
    pub(crate) fn indices(&self) -> &[TokenId] {
        &self.indices
    }

    fn live(&self) -> usize {
        self.indices.partition_point(|&token| token != EMPTY_SLOT)
    }

    fn get(&self, token: TokenId) -> Option<&Successor> {
        let slot = find_slot(&self.indices, token).ok()?;
        self.successors.get(slot)?.as_ref()
    }

    fn get_mut(&mut self, token: TokenId) -> Option<&mut Successor> {
        let slot = find_slot(&self.indices, token).ok()?;
        self.successors.get_mut(slot)?.as_mut()
    }

    fn insert(&mut self, token: TokenId, successor: Successor) {
        match find_slot(&self.indices, token) {
            Ok(slot) => self.successors[slot] = Some(successor),
            Err(slot) => {
                self.indices.pop();
                self.successors.pop();
                self.indices.insert(slot, token);
                self.successors.insert(slot, Some(successor));
                if self.indices.last() != Some(&EMPTY_SLOT) {
                    self.grow();
                }
            }
        }
    }

    fn remove(&mut self, token: TokenId) {
        let Ok(slot) = find_slot(&self.indices, token) else {
            return;
        };
        self.indices.remove(slot);
        self.successors.remove(slot);
        self.indices.push(EMPTY_SLOT);
        self.successors.push(None);

        let live = self.live();
        if live >= 5 && live < self.indices.len() / 2 {
            self.indices.truncate(live + 1);
            self.successors.truncate(live + 1);
        }
    }

    fn grow(&mut self) {
        let new_len = (self.indices.len() as f64 * GROWTH_FACTOR) as usize + 1;
        self.indices.resize(new_len, EMPTY_SLOT);
        self.successors.resize_with(new_len, || None);
    }

    fn iter(&self) -> impl Iterator<Item = (TokenId, &Successor)> + '_ {
        self.indices
            .iter()
            .zip(&self.successors)
            .take_while(|(token, _)| **token != EMPTY_SLOT)
            .filter_map(|(token, successor)| successor.as_ref().map(|s| (*token, s)))
    }
}

#[derive(Debug, Clone)]
enum Edges {
    Sparse(SparseEdges),
    Dense(DenseEdges),
}

impl Edges {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Sparse => Edges::Sparse(SparseEdges::default()),
            Encoding::Dense => Edges::Dense(DenseEdges::default()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Edges::Sparse(sparse) => sparse.map.len(),
            Edges::Dense(dense) => dense.live(),
        }
    }

    fn get(&self, token: TokenId) -> Option<&Successor> {
        match self {
            Edges::Sparse(sparse) => sparse.map.get(&token),
            Edges::Dense(dense) => dense.get(token),
        }
    }

    fn get_mut(&mut self, token: TokenId) -> Option<&mut Successor> {
        match self {
            Edges::Sparse(sparse) => sparse.map.get_mut(&token),
            Edges::Dense(dense) => dense.get_mut(token),
        }
    }

    fn insert(&mut self, token: TokenId, successor: Successor) {
        match self {
            Edges::Sparse(sparse) => sparse.insert(token, successor),
            Edges::Dense(dense) => dense.insert(token, successor),
        }
    }

    fn remove(&mut self, token: TokenId) {
        match self {
            Edges::Sparse(sparse) => sparse.remove(token),
            Edges::Dense(dense) => dense.remove(token),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (TokenId, &Successor)> + '_> {
        match self {
            Edges::Sparse(sparse) => Box::new(sparse.iter()),
            Edges::Dense(dense) => Box::new(dense.iter()),
        }
    }
}

/// A context in the in-memory trie.
#[derive(Debug, Clone)]
pub struct TrieNode {
    total_count: i32,
    edges: Edges,
}

impl TrieNode {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            total_count: 0,
            edges: Edges::new(encoding),
        }
    }

    /// Expands a tail array into a node at `depth`.
    fn from_tail(tail: &[TokenId], depth: usize, options: &TrieOptions) -> Self {
        let mut node = TrieNode::new(options.encoding_for(depth));
        node.total_count = tail[0];
        if let Some((&next, continuation)) = tail.get(1..).and_then(|rest| rest.split_first()) {
            node.edges.insert(next, Successor::tail(tail[0], continuation));
        }
        node
    }

    pub fn total_count(&self) -> i32 {
        self.total_count
    }

    pub fn distinct_successors(&self) -> i32 {
        self.edges.len() as i32
    }

    pub fn counts(&self) -> Counts {
        Counts::new(self.distinct_successors(), self.total_count)
    }

    pub fn encoding(&self) -> Encoding {
        match self.edges {
            Edges::Sparse(_) => Encoding::Sparse,
            Edges::Dense(_) => Encoding::Dense,
        }
    }

    pub fn successor(&self, token: TokenId) -> Option<&Successor> {
        self.edges.get(token)
    }

    /// Live successors in encounter order: insertion order for sparse
    /// nodes, token order for dense ones.
    pub fn successors(&self) -> impl Iterator<Item = (TokenId, &Successor)> + '_ {
        self.edges.iter()
    }

    /// Successor ids ranked by descending count, ties in encounter order.
    pub fn top_successors(&self, limit: usize) -> Vec<TokenId> {
        let mut ranked: Vec<(TokenId, i32)> = self
            .successors()
            .map(|(token, successor)| (token, successor.count()))
            .filter(|&(_, count)| count > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(limit).map(|(token, _)| token).collect()
    }

    /// Occurrences that end exactly at this node.
    fn own_occurrences(&self) -> i32 {
        let below: i32 = self.successors().map(|(_, successor)| successor.count()).sum();
        self.total_count - below
    }

    fn dense_slots(&self) -> usize {
        match &self.edges {
            Edges::Dense(dense) => dense.slots(),
            Edges::Sparse(_) => 0,
        }
    }

    fn promote_to_sparse(&mut self) {
        let edges = std::mem::replace(&mut self.edges, Edges::Sparse(SparseEdges::default()));
        self.edges = match edges {
            Edges::Dense(dense) => Edges::Sparse(SparseEdges::from_dense(dense)),
            sparse => sparse,
        };
    }

    #[cfg(test)]
    pub(crate) fn dense_edges(&self) -> Option<&DenseEdges> {
        match &self.edges {
            Edges::Dense(dense) => Some(dense),
            Edges::Sparse(_) => None,
        }
    }

    fn adjust(&mut self, sequence: &[TokenId], index: usize, adj: i32, options: &TrieOptions) {
        if let Some(&token) = sequence.get(index) {
            let exhausted = match self.edges.get_mut(token) {
                Some(successor) => {
                    successor.adjust(sequence, index + 1, adj, options);
                    successor.count() <= 0
                }
                None => {
                    if adj > 0 {
                        self.edges
                            .insert(token, Successor::tail(adj, &sequence[index + 1..]));
                    }
                    false
                }
            };
            if exhausted {
                self.edges.remove(token);
            }
        }
        self.total_count += adj;
    }
}

/// Resolved context inside the in-memory trie.
enum View<'a> {
    Node(&'a TrieNode),
    Tail { count: i32, rest: &'a [TokenId] },
}

/// Mutable n-gram counter.
#[derive(Debug, Clone)]
pub struct TrieCounter {
    root: TrieNode,
    options: TrieOptions,
}

impl Default for TrieCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieCounter {
    pub fn new() -> Self {
        Self::with_options(TrieOptions::default())
    }

    pub fn with_options(options: TrieOptions) -> Self {
        Self {
            root: TrieNode::new(options.encoding_for(0)),
            options,
        }
    }

    pub fn root(&self) -> &TrieNode {
        &self.root
    }

    pub fn options(&self) -> TrieOptions {
        self.options
    }

    pub fn is_empty(&self) -> bool {
        self.root.total_count == 0
    }

    /// Count every forward window of `tokens` up to `order` tokens long.
    pub fn train(&mut self, tokens: &[TokenId], order: usize) {
        self.count_batch(sequencer::forward(tokens, order));
    }

    /// Adds one occurrence of `sequence`.
    ///
    /// Returns `false` without counting when the sequence contains the
    /// reserved [`EMPTY_SLOT`] id.
    pub fn count(&mut self, sequence: &[TokenId]) -> bool {
        if sequence.contains(&EMPTY_SLOT) {
            log::warn!("Refusing to count a sequence containing the reserved token id");
            return false;
        }
        self.root.adjust(sequence, 0, 1, &self.options);
        true
    }

    /// Removes one occurrence of `sequence`.
    ///
    /// Only sequences that were counted can be removed; anything else is a
    /// no-op returning `false`.
    pub fn uncount(&mut self, sequence: &[TokenId]) -> bool {
        if self.occurrences(sequence) <= 0 {
            log::debug!("Ignoring uncount of unknown sequence {sequence:?}");
            return false;
        }
        self.root.adjust(sequence, 0, -1, &self.options);
        true
    }

    pub fn count_batch<I, S>(&mut self, sequences: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[TokenId]>,
    {
        for sequence in sequences {
            self.count(sequence.as_ref());
        }
    }

    pub fn uncount_batch<I, S>(&mut self, sequences: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[TokenId]>,
    {
        for sequence in sequences {
            self.uncount(sequence.as_ref());
        }
    }

    pub fn total_count(&self) -> i64 {
        i64::from(self.root.total_count)
    }

    pub fn counts(&self, sequence: &[TokenId]) -> Counts {
        match self.resolve(sequence) {
            Some(View::Node(node)) => node.counts(),
            Some(View::Tail { count, rest }) => tail_counts(count, rest),
            None => Counts::default(),
        }
    }

    pub fn top_successors(&self, sequence: &[TokenId], limit: usize) -> Vec<TokenId> {
        match self.resolve(sequence) {
            Some(View::Node(node)) => node.top_successors(limit),
            Some(View::Tail { rest, .. }) => tail_top_successor(rest, limit),
            None => Vec::new(),
        }
    }

    /// How many times exactly `sequence` was counted.
    pub fn occurrences(&self, sequence: &[TokenId]) -> i32 {
        match self.resolve(sequence) {
            Some(View::Node(node)) => node.own_occurrences(),
            Some(View::Tail { count, rest }) if rest.is_empty() => count,
            _ => 0,
        }
    }

    fn resolve(&self, sequence: &[TokenId]) -> Option<View<'_>> {
        let mut node = &self.root;
        for (index, &token) in sequence.iter().enumerate() {
            match node.successor(token)? {
                Successor::Node(child) => node = child.as_ref(),
                Successor::Tail(tail) => {
                    let rest = tail_suffix(tail, &sequence[index + 1..])?;
                    return Some(View::Tail {
                        count: tail[0],
                        rest,
                    });
                }
            }
        }
        Some(View::Node(node))
    }
}

impl NgramCounts for TrieCounter {
    fn total_count(&self) -> Result<i64> {
        Ok(TrieCounter::total_count(self))
    }

    fn counts(&self, sequence: &[TokenId]) -> Result<Counts> {
        Ok(TrieCounter::counts(self, sequence))
    }

    fn top_successors(&self, sequence: &[TokenId], limit: usize) -> Result<Vec<TokenId>> {
        Ok(TrieCounter::top_successors(self, sequence, limit))
    }
}
