//! ngram-counter - persistent n-gram counting trie.
//!
//! # Overview
//!
//! Counts of integer token sequences are gathered in an in-memory trie,
//! written once to an immutable file and then queried lazily:
//! - Training fills a [`TrieCounter`] with every window of a token stream
//! - [`serialize`] writes it children-first, root offset last
//! - [`deserialize`] opens the file; nodes are decoded on demand and kept in
//!   a bounded [`NodeCache`]
//! - A [`ForgettingOverlay`] subtracts temporarily excluded occurrences
//!   without touching the file
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Token stream   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  TrieCounter    │ ← In-memory sparse/dense trie (trie.rs, sequencer.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Encoder        │ ← Post-order, big-endian records (writer.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  NodeCache      │ ← Locked file handle + LRU of decoded nodes (cache.rs, node.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ PersistedCounter│ ← Read-only queries (counter.rs)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ForgettingOverlay│ ← Per-session exclusions (forgetting.rs)
//! └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - `counts.rs`: Token ids, count aggregates and the shared query trait
//! - `trie.rs`: Mutable counting trie
//! - `node.rs`: Persisted record layout and node decoding
//! - `writer.rs`: Serialization
//! - `cache.rs`: File-backed node cache
//! - `counter.rs`: Persisted counter
//! - `forgetting.rs`: Forgetting overlay
//! - `config.rs`: Cache and trie settings (confy)

pub mod cache;
pub mod config;
pub mod counter;
pub mod counts;
pub mod error;
pub mod forgetting;
pub mod node;
pub mod sequencer;
pub mod trie;
pub mod writer;

pub use cache::{CacheStats, NodeCache};
pub use config::CounterConfig;
pub use counter::{deserialize, PersistedCounter};
pub use counts::{Counts, NgramCounts, TokenId, EMPTY_SLOT};
pub use error::{CounterError, Result};
pub use forgetting::ForgettingOverlay;
pub use node::{NodeRef, PersistedNode};
pub use trie::{TrieCounter, TrieOptions};
pub use writer::serialize;
