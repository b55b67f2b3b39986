//! The outward surface: `rebuild(corpus_root)` and `search(query, top_n, min_score)`.
//!
//! A rebuild holds the write side of the engine's lock for its whole duration,
//! searches hold the read side. A query issued mid-rebuild therefore waits
//! and then sees the finished store, never a half-written one.
//!
//! Extraction and scoring run on a rayon pool owned by the engine and sized
//! from `index.threads`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{info, instrument};

use crate::config::Config;
use crate::descriptor::{Descriptor, MatchResult};
use crate::error::{Result, SearchError};
use crate::extract::{Extractor, GradientGridExtractor};
use crate::indexer::{enumerate_candidates, IndexReport};
use crate::matcher::Matcher;
use crate::preprocess::Preprocessor;
use crate::ranker::search_detailed;
use crate::store::{DescriptorStore, StoreMeta};

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query_descriptors: usize,
    pub results: Vec<MatchResult>,
    pub scanned: usize,
    pub skipped: usize,
    pub total_hits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Images currently under the corpus root, when one was given.
    pub corpus_images: Option<usize>,
    pub records: usize,
    pub meta: Option<StoreMeta>,
}

pub struct Engine {
    store: DescriptorStore,
    extractor: Arc<dyn Extractor>,
    preprocessor: Preprocessor,
    matcher: Matcher,
    config: Config,
    pool: ThreadPool,
    gate: RwLock<()>,
}

impl Engine {
    /// Open (or create) the store at `store_path` with the built-in extractor.
    pub fn open<P: AsRef<Path>>(store_path: P, config: Config) -> Result<Self> {
        let store = DescriptorStore::open(store_path)?;
        Self::with_extractor(store, Arc::new(GradientGridExtractor::default()), config)
    }

    /// Open a store that was already built; fails with `StoreMissing` rather
    /// than creating an empty one.
    pub fn open_existing<P: AsRef<Path>>(store_path: P, config: Config) -> Result<Self> {
        let store = DescriptorStore::open_existing(store_path)?;
        Self::with_extractor(store, Arc::new(GradientGridExtractor::default()), config)
    }

    pub fn with_extractor(store: DescriptorStore, extractor: Arc<dyn Extractor>, config: Config) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.index.threads)
            .thread_name(|i| format!("simsearch-{i}"))
            .build()
            .map_err(|e| SearchError::Config(format!("cannot start worker pool: {e}")))?;
        Ok(Self {
            store,
            extractor,
            preprocessor: Preprocessor::from_config(&config.preprocess),
            matcher: Matcher::new(config.matcher.ratio),
            config,
            pool,
            gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Worker threads used for extraction and scoring.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Replace the store contents with a fresh index of `corpus_root`.
    pub fn rebuild(&self, corpus_root: &Path) -> Result<usize> {
        Ok(self.rebuild_report(corpus_root)?.indexed)
    }

    pub fn rebuild_report(&self, corpus_root: &Path) -> Result<IndexReport> {
        let _guard = self.gate.write();
        self.rebuild_locked(corpus_root)
    }

    /// Rebuild only when the store holds no usable records.
    ///
    /// The emptiness check and the rebuild happen under one write guard, so
    /// concurrent callers build the index at most once.
    pub fn ensure_index(&self, corpus_root: &Path) -> Result<Option<IndexReport>> {
        if self.populated() {
            return Ok(None);
        }
        let _guard = self.gate.write();
        if self.store.record_count() > 0 {
            return Ok(None);
        }
        info!(root = %corpus_root.display(), "store has no records, building index");
        self.rebuild_locked(corpus_root).map(Some)
    }

    fn populated(&self) -> bool {
        let _guard = self.gate.read();
        self.store.record_count() > 0
    }

    /// Caller holds the write side of `gate`.
    fn rebuild_locked(&self, corpus_root: &Path) -> Result<IndexReport> {
        self.pool.install(|| {
            self.store.rebuild(corpus_root, self.extractor.as_ref(), &self.preprocessor, &self.config.index)
        })
    }

    #[instrument(skip(self), fields(query = %query_path.display()))]
    pub fn search(&self, query_path: &Path, top_n: usize, min_score: u32) -> Result<SearchOutcome> {
        let image = self
            .preprocessor
            .from_path(query_path)
            .map_err(|e| SearchError::NoFeatures { reason: e.to_string() })?;
        let query = self.extractor.extract(&image);
        self.search_descriptors(&query, top_n, min_score)
    }

    /// Same as [`Engine::search`] for an image already in memory.
    pub fn search_bytes(&self, bytes: &[u8], top_n: usize, min_score: u32) -> Result<SearchOutcome> {
        let image = self
            .preprocessor
            .from_bytes(bytes)
            .map_err(|e| SearchError::NoFeatures { reason: e.to_string() })?;
        let query = self.extractor.extract(&image);
        self.search_descriptors(&query, top_n, min_score)
    }

    /// Rank the store against descriptors that were already extracted.
    ///
    /// An empty query is rejected before the store is touched.
    pub fn search_descriptors(&self, query: &[Descriptor], top_n: usize, min_score: u32) -> Result<SearchOutcome> {
        if query.is_empty() {
            return Err(SearchError::NoFeatures { reason: "image is blank or too small".into() });
        }
        let _guard = self.gate.read();
        if let Some(meta) = self.store.meta()? {
            let actual = query[0].len();
            if meta.dimension != actual {
                return Err(SearchError::DimensionMismatch { expected: meta.dimension, actual });
            }
        }
        let ranking = self
            .pool
            .install(|| search_detailed(query, &self.store, &self.matcher, top_n, min_score));
        Ok(SearchOutcome {
            query_descriptors: query.len(),
            results: ranking.results,
            scanned: ranking.scanned,
            skipped: ranking.skipped,
            total_hits: ranking.total_hits,
        })
    }

    pub fn stats(&self, corpus_root: Option<&Path>) -> Result<Stats> {
        let corpus_images = match corpus_root {
            Some(root) => Some(enumerate_candidates(root, &self.config.index.extensions)?.len()),
            None => None,
        };
        let _guard = self.gate.read();
        Ok(Stats { corpus_images, records: self.store.record_count(), meta: self.store.meta()? })
    }
}
