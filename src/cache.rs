//! File-backed node cache.
//!
//! One read-only handle to the counter file is shared by every lookup and
//! guarded by a mutex. A miss holds that lock only while it seeks and copies
//! the raw record bytes into a private buffer; decoding happens after the
//! lock is released, so concurrent lookups interleave their I/O.
//!
//! Decoded nodes live in two places:
//! - a bounded LRU keyed by [`NodeRef`], which may drop entries at any time
//!   (the file is immutable, so a dropped node is simply read again);
//! - a pinned map filled when the counter is opened, never evicted.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::error::{CounterError, Result};
use crate::node::{NodeRef, PersistedNode, DENSE_TAG, EDGE_LEN, NODE_COUNTS_LEN, SPARSE_TAG};

/// Size of the root pointer at the end of the file.
const ROOT_POINTER_LEN: u64 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub cached: usize,
    pub pinned: usize,
}

/// Raw bytes of one record, copied out of the shared handle.
enum RawRecord {
    Node {
        tag: i32,
        child_count: usize,
        body: Vec<u8>,
    },
    Leaf {
        body: Vec<u8>,
    },
}

pub struct NodeCache {
    path: PathBuf,
    file: Mutex<File>,
    /// Length of the file without the root pointer.
    payload_end: u64,
    nodes: Mutex<LruCache<NodeRef, Arc<PersistedNode>>>,
    pinned: RwLock<AHashMap<NodeRef, Arc<PersistedNode>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl NodeCache {
    /// Opens `path` for lazy reads, keeping at most `capacity` unpinned nodes.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < ROOT_POINTER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "counter file is shorter than its root pointer",
            )
            .into());
        }

        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            payload_end: len - ROOT_POINTER_LEN,
            nodes: Mutex::new(LruCache::new(capacity)),
            pinned: RwLock::new(AHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the root pointer stored in the last four bytes.
    pub fn root_ref(&self) -> Result<NodeRef> {
        let mut word = [0u8; 4];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.payload_end))?;
            file.read_exact(&mut word)?;
        }
        let offset = i32::from_be_bytes(word);
        if offset < 0 || offset as u64 >= self.payload_end {
            return Err(CounterError::format(
                self.payload_end,
                format!("root offset {offset} out of bounds"),
            ));
        }
        Ok(NodeRef::new(offset as u32))
    }

    /// Resolves `node` from the pinned map, the LRU or the file.
    pub fn get(&self, node: NodeRef) -> Result<Arc<PersistedNode>> {
        if let Some(found) = self.pinned.read().get(&node) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }
        if let Some(found) = self.nodes.lock().get(&node) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let decoded = Arc::new(self.read(node)?);
        if let Some((evicted, _)) = self.nodes.lock().push(node, Arc::clone(&decoded)) {
            if evicted != node {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(decoded)
    }

    /// Reads and decodes `node` from the file, bypassing every cache.
    pub fn read(&self, node: NodeRef) -> Result<PersistedNode> {
        match self.read_raw(node)? {
            RawRecord::Node {
                tag,
                child_count,
                body,
            } => PersistedNode::decode_node(node, tag, child_count, &body, self.payload_end),
            RawRecord::Leaf { body } => PersistedNode::decode_leaf(node, &body),
        }
    }

    /// Resolves `node` like [`NodeCache::get`], but a miss is decoded without
    /// entering the LRU and hits do not refresh recency.
    pub(crate) fn get_untracked(&self, node: NodeRef) -> Result<Arc<PersistedNode>> {
        if let Some(found) = self.pinned.read().get(&node) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }
        if let Some(found) = self.nodes.lock().peek(&node) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(self.read(node)?))
    }

    /// Keeps `decoded` for `node` outside the LRU.
    pub fn pin(&self, node: NodeRef, decoded: Arc<PersistedNode>) {
        self.pinned.write().insert(node, decoded);
    }

    /// Drops every unpinned node.
    pub fn clear(&self) {
        self.nodes.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cached: self.nodes.lock().len(),
            pinned: self.pinned.read().len(),
        }
    }

    fn read_raw(&self, node: NodeRef) -> Result<RawRecord> {
        let offset = node.offset();
        let out_of_bounds =
            |what: &str| CounterError::format(offset, format!("{what} runs past the payload"));
        if offset + 4 > self.payload_end {
            return Err(out_of_bounds("record tag"));
        }

        let mut word = [0u8; 4];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut word)?;
        let tag = i32::from_be_bytes(word);

        let record = match tag {
            SPARSE_TAG | DENSE_TAG => {
                if offset + 8 > self.payload_end {
                    return Err(out_of_bounds("node header"));
                }
                file.read_exact(&mut word)?;
                let child_count = i32::from_be_bytes(word);
                if child_count < 0 {
                    return Err(CounterError::format(
                        offset,
                        format!("negative child count {child_count}"),
                    ));
                }
                let body_len = (child_count as usize)
                    .checked_mul(EDGE_LEN)
                    .and_then(|edges| edges.checked_add(NODE_COUNTS_LEN))
                    .ok_or_else(|| {
                        CounterError::format(offset, format!("child count {child_count} overflows"))
                    })?;
                let child_count = child_count as usize;
                if offset + 8 + body_len as u64 > self.payload_end {
                    return Err(out_of_bounds("node body"));
                }
                let mut body = vec![0u8; body_len];
                file.read_exact(&mut body)?;
                RawRecord::Node {
                    tag,
                    child_count,
                    body,
                }
            }
            len if len >= 0 => {
                let body_len = (len as usize).checked_mul(4).ok_or_else(|| {
                    CounterError::format(offset, format!("tail length {len} overflows"))
                })?;
                if offset + 4 + body_len as u64 > self.payload_end {
                    return Err(out_of_bounds("tail array"));
                }
                let mut body = vec![0u8; body_len];
                file.read_exact(&mut body)?;
                RawRecord::Leaf { body }
            }
            other => {
                return Err(CounterError::format(offset, format!("unknown record tag {other}")));
            }
        };
        drop(file);

        log::debug!("Read record at offset {offset} from {}", self.path.display());
        Ok(record)
    }
}
