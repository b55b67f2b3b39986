//! Persistent descriptor store backed by an embedded sled database.
//!
//! One record per identity lives in the `records` tree under its derived
//! storage key; the `meta` tree holds a single JSON [`StoreMeta`]. Records are
//! only ever replaced wholesale by [`DescriptorStore::rebuild`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::IndexConfig;
use crate::descriptor::DescriptorSet;
use crate::error::{Result, SearchError};
use crate::extract::Extractor;
use crate::indexer::{process_dataset, IndexReport};
use crate::preprocess::Preprocessor;
use crate::record;

const RECORDS_TREE: &str = "records";
const META_TREE: &str = "meta";
const META_KEY: &str = "meta";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub version: u32,
    pub extractor: String,
    pub dimension: usize,
    pub num_records: usize,
    pub created_at: String,
}

pub struct DescriptorStore {
    path: PathBuf,
    db: sled::Db,
    records: sled::Tree,
    meta: sled::Tree,
}

impl DescriptorStore {
    /// Open the store at `path`, creating an empty one if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let records = db.open_tree(RECORDS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        Ok(Self { path, db, records, meta })
    }

    /// Open a store that must already exist.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        if !p.exists() {
            return Err(SearchError::StoreMissing { path: p.to_path_buf() });
        }
        Self::open(p)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every record and re-index `corpus_root` from scratch.
    ///
    /// The corpus root is checked before anything is discarded, so a missing
    /// root leaves the previous contents intact.
    #[instrument(skip(self, extractor, preprocessor, config), fields(store = %self.path.display()))]
    pub fn rebuild(
        &self,
        corpus_root: &Path,
        extractor: &dyn Extractor,
        preprocessor: &Preprocessor,
        config: &IndexConfig,
    ) -> Result<IndexReport> {
        if !corpus_root.is_dir() {
            return Err(SearchError::CorpusRootMissing { path: corpus_root.to_path_buf() });
        }
        self.clear()?;
        let report = process_dataset(corpus_root, self, extractor, preprocessor, config)?;
        let meta = StoreMeta {
            version: FORMAT_VERSION,
            extractor: extractor.name().to_string(),
            dimension: extractor.dimension(),
            num_records: report.indexed,
            created_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        };
        self.write_meta(&meta)?;
        self.db.flush()?;
        info!(indexed = report.indexed, "store rebuilt");
        Ok(report)
    }

    pub fn clear(&self) -> Result<()> {
        self.records.clear()?;
        self.meta.clear()?;
        Ok(())
    }

    /// Write or overwrite the record for `set.identity`.
    pub fn insert(&self, set: &DescriptorSet) -> Result<()> {
        let text = record::encode(set)?;
        self.records.insert(set.storage_key().as_bytes(), text.into_bytes())?;
        Ok(())
    }

    /// Stream every parseable record in key order. Malformed records are
    /// logged and skipped; see [`LoadAll::skipped`].
    pub fn load_all(&self) -> LoadAll {
        let dimension = self.meta().ok().flatten().map(|m| m.dimension);
        LoadAll { iter: self.records.iter(), dimension, skipped: 0 }
    }

    pub fn record_count(&self) -> usize {
        self.load_all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn meta(&self) -> Result<Option<StoreMeta>> {
        match self.meta.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_meta(&self, meta: &StoreMeta) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta)?;
        self.meta.insert(META_KEY, json)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Raw write that bypasses encoding, for exercising read-time recovery.
    #[doc(hidden)]
    pub fn insert_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.as_bytes(), value)?;
        Ok(())
    }
}

/// Lazy scan over the records tree, decoding one record at a time.
pub struct LoadAll {
    iter: sled::Iter,
    dimension: Option<usize>,
    skipped: usize,
}

impl LoadAll {
    /// Records skipped so far because they failed to read or decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for LoadAll {
    type Item = DescriptorSet;

    fn next(&mut self) -> Option<DescriptorSet> {
        loop {
            let (key, value) = match self.iter.next()? {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(error = %e, "failed to read record, skipping");
                    self.skipped += 1;
                    continue;
                }
            };
            let key = String::from_utf8_lossy(&key);
            match record::decode(&value) {
                Ok(set) => match (self.dimension, set.dimension()) {
                    (Some(expected), Some(actual)) if expected != actual => {
                        warn!(%key, expected, actual, "record dimension differs from store, skipping");
                        self.skipped += 1;
                    }
                    _ => return Some(set),
                },
                Err(e) => {
                    warn!(%key, error = %e, "malformed record, skipping");
                    self.skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_is_empty() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::open(dir.path().join("db")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.meta().unwrap(), None);
    }

    #[test]
    fn open_existing_requires_location() {
        let dir = tempdir().unwrap();
        let err = DescriptorStore::open_existing(dir.path().join("missing")).err().unwrap();
        assert!(matches!(err, SearchError::StoreMissing { .. }));
    }

    #[test]
    fn insert_overwrites_same_identity() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::open(dir.path().join("db")).unwrap();
        store.insert(&DescriptorSet::new("a.png", vec![vec![1.0, 2.0]])).unwrap();
        store.insert(&DescriptorSet::new("a.png", vec![vec![3.0, 4.0]])).unwrap();
        let all: Vec<_> = store.load_all().collect();
        assert_eq!(all, vec![DescriptorSet::new("a.png", vec![vec![3.0, 4.0]])]);
    }

    #[test]
    fn malformed_records_are_counted_not_raised() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::open(dir.path().join("db")).unwrap();
        store.insert(&DescriptorSet::new("good.png", vec![vec![1.0, 2.0]])).unwrap();
        store.insert_raw("bad-1", b"ORIGINAL_PATH,bad.png\n1,oops\n").unwrap();
        store.insert_raw("bad-2", b"no header here").unwrap();

        let mut all = store.load_all();
        let sets: Vec<_> = all.by_ref().collect();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].identity, "good.png");
        assert_eq!(all.skipped(), 2);
        assert_eq!(store.record_count(), 1);
    }
}
