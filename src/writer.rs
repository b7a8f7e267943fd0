//! Post-order encoder for in-memory tries.
//!
//! Children are written before their parent, so every offset a record
//! refers to is already on disk when the record is written. The root offset
//! goes last, after the whole payload.
//!
//! The bytes are streamed into a temporary file next to the target and only
//! renamed over it once complete and synced; a failed write leaves nothing
//! at the target path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{CounterError, Result};
use crate::node::{DENSE_TAG, SPARSE_TAG};
use crate::trie::{Encoding, Successor, TrieCounter, TrieNode};

/// Writes `trie` to `path`, replacing any existing file.
pub fn serialize(path: &Path, trie: &TrieCounter) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)?;

    let (root, written) = {
        let mut encoder = Encoder::new(temp.as_file_mut());
        let root = encoder.write_node(trie.root())?;
        encoder.write_word(root)?;
        let written = encoder.finish()?;
        (root, written)
    };
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    log::info!(
        "Serialized {} occurrences to {} ({written} bytes, root at {root})",
        trie.total_count(),
        path.display()
    );
    Ok(())
}

struct Encoder<'a> {
    out: BufWriter<&'a mut File>,
    position: u64,
}

impl<'a> Encoder<'a> {
    fn new(file: &'a mut File) -> Self {
        Self {
            out: BufWriter::new(file),
            position: 0,
        }
    }

    fn write_word(&mut self, word: i32) -> Result<()> {
        self.out.write_all(&word.to_be_bytes())?;
        self.position += 4;
        Ok(())
    }

    /// Offset of the next record; it has to fit a 4-byte reference.
    fn offset(&self) -> Result<i32> {
        i32::try_from(self.position).map_err(|_| {
            CounterError::format(self.position, "counter exceeds the 4-byte offset range")
        })
    }

    fn write_successor(&mut self, successor: &Successor) -> Result<i32> {
        match successor {
            Successor::Node(node) => self.write_node(node),
            Successor::Tail(tail) => self.write_tail(tail),
        }
    }

    fn write_tail(&mut self, tail: &[i32]) -> Result<i32> {
        let at = self.offset()?;
        self.write_word(tail.len() as i32)?;
        for &word in tail {
            self.write_word(word)?;
        }
        Ok(at)
    }

    fn write_node(&mut self, node: &TrieNode) -> Result<i32> {
        let mut edges = Vec::new();
        for (token, successor) in node.successors() {
            let offset = self.write_successor(successor)?;
            edges.push((token, successor.count(), offset));
        }
        // most popular first, ties in encounter order
        edges.sort_by(|a, b| b.1.cmp(&a.1));

        let at = self.offset()?;
        let tag = match node.encoding() {
            Encoding::Sparse => SPARSE_TAG,
            Encoding::Dense => DENSE_TAG,
        };
        let counts = node.counts();
        self.write_word(tag)?;
        self.write_word(edges.len() as i32)?;
        self.write_word(counts.distinct_successors)?;
        self.write_word(counts.total_count)?;
        for (token, _, offset) in edges {
            self.write_word(token)?;
            self.write_word(offset)?;
        }
        Ok(at)
    }

    fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_words(path: &Path) -> Vec<i32> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(4)
            .map(|w| i32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    #[test]
    fn test_single_sequence_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        let mut trie = TrieCounter::new();
        trie.count(&[1, 2]);
        serialize(&path, &trie).unwrap();

        assert_eq!(
            read_words(&path),
            vec![
                2, 1, 2, // tail [1, 2] at 0
                SPARSE_TAG, 1, 1, 1, 1, 0, // root at 12
                12,
            ]
        );
    }

    #[test]
    fn test_children_ordered_by_descending_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        let mut trie = TrieCounter::new();
        for (token, times) in [(10, 5), (20, 9), (30, 2), (40, 9)] {
            for _ in 0..times {
                trie.count(&[token]);
            }
        }
        serialize(&path, &trie).unwrap();

        let words = read_words(&path);
        let root = *words.last().unwrap() as usize / 4;
        assert_eq!(&words[root..root + 4], &[SPARSE_TAG, 4, 4, 25]);
        let tokens: Vec<i32> = words[root + 4..words.len() - 1]
            .chunks_exact(2)
            .map(|pair| pair[0])
            .collect();
        assert_eq!(tokens, vec![20, 40, 10, 30]);
    }

    #[test]
    fn test_dense_nodes_use_dense_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        let options = crate::trie::TrieOptions {
            sparse_levels: 0,
            max_dense_slots: usize::MAX,
        };
        let mut trie = TrieCounter::with_options(options);
        trie.count(&[3]);
        serialize(&path, &trie).unwrap();

        let words = read_words(&path);
        let root = *words.last().unwrap() as usize / 4;
        assert_eq!(words[root], DENSE_TAG);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempdir().unwrap();
        let mut trie = TrieCounter::new();
        trie.count(&[1]);

        let missing_parent = dir.path().join("missing").join("counter.bin");
        assert!(matches!(
            serialize(&missing_parent, &trie),
            Err(CounterError::Io(_))
        ));
        assert!(!missing_parent.exists());

        // renaming a file over a directory fails after the payload is written
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        assert!(serialize(&target, &trie).is_err());
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_existing_file_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        std::fs::write(&path, b"stale").unwrap();
        serialize(&path, &TrieCounter::new()).unwrap();
        assert_eq!(read_words(&path), vec![SPARSE_TAG, 0, 0, 0, 0]);
    }
}
