use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::trie::TrieOptions;

const APP_NAME: &str = "ngram-counter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Decoded nodes kept in the LRU part of the node cache.
    pub cache_capacity: usize,
    /// Trie levels pinned in the cache when a counter is opened.
    pub prepare_depth: usize,
    /// Window length used when counting token streams.
    pub ngram_order: usize,
    /// In-memory nodes shallower than this are created sparse.
    pub sparse_levels: usize,
    /// Dense in-memory nodes with more slots than this become sparse.
    pub max_dense_slots: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 3_000,
            prepare_depth: 2,
            ngram_order: 6,
            sparse_levels: 3,
            max_dense_slots: 10,
        }
    }
}

impl CounterConfig {
    pub fn load() -> Result<Self> {
        match confy::load(APP_NAME, Some("config")) {
            Ok(config) => Ok(config),
            Err(err) => {
                log::warn!("Failed to load config, using defaults: {err}");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(confy::load_path(path)?)
    }

    pub fn save(&self) -> Result<()> {
        confy::store(APP_NAME, Some("config"), self)?;
        Ok(())
    }

    pub fn trie_options(&self) -> TrieOptions {
        TrieOptions {
            sparse_levels: self.sparse_levels,
            max_dense_slots: self.max_dense_slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_roundtrips_stored_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = CounterConfig {
            cache_capacity: 17,
            prepare_depth: 3,
            ..CounterConfig::default()
        };
        confy::store_path(&path, &config).unwrap();

        let loaded = CounterConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_defaults_pin_two_levels() {
        let config = CounterConfig::default();
        assert_eq!(config.prepare_depth, 2);
        assert_eq!(config.cache_capacity, 3_000);
    }

    #[test]
    fn test_trie_options_follow_config() {
        let config = CounterConfig {
            sparse_levels: 0,
            max_dense_slots: 4,
            ..CounterConfig::default()
        };
        let options = config.trie_options();
        assert_eq!(options.sparse_levels, 0);
        assert_eq!(options.max_dense_slots, 4);
    }
}
