use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::descriptor::DescriptorSet;
use crate::error::{Result, SearchError};
use crate::extract::Extractor;
use crate::preprocess::Preprocessor;
use crate::store::DescriptorStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub candidates: usize,
    pub indexed: usize,
    pub skipped: usize,
}

/// A corpus file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub identity: String,
    pub path: PathBuf,
}

/// Corpus-relative, `/`-separated identity of `path`, or `None` when the path
/// is outside `root` or not valid UTF-8.
pub fn identity_for(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(s) => parts.push(s.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() { None } else { Some(parts.join("/")) }
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Every image under `root` (recursive) with an allowed extension, sorted by identity.
pub fn enumerate_candidates(root: &Path, extensions: &[String]) -> Result<Vec<Candidate>> {
    if !root.is_dir() {
        return Err(SearchError::CorpusRootMissing { path: root.to_path_buf() });
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
        let p = entry.path();
        if !entry.file_type().is_file() || !has_allowed_extension(p, extensions) {
            continue;
        }
        match identity_for(root, p) {
            Some(identity) => out.push(Candidate { identity, path: p.to_path_buf() }),
            None => debug!(path = %p.display(), "path is not valid utf-8, skipping"),
        }
    }
    out.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(out)
}

fn extract_one(candidate: &Candidate, extractor: &dyn Extractor, preprocessor: &Preprocessor) -> Option<DescriptorSet> {
    let image = match preprocessor.from_path(&candidate.path) {
        Ok(img) => img,
        Err(e) => {
            debug!(identity = %candidate.identity, error = %e, "unreadable image, skipping");
            return None;
        }
    };
    let vectors = extractor.extract(&image);
    if vectors.is_empty() {
        debug!(identity = %candidate.identity, "no descriptors, skipping");
        return None;
    }
    let expected = extractor.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        warn!(identity = %candidate.identity, expected, actual = bad.len(), "extractor returned wrong dimension, skipping");
        return None;
    }
    Some(DescriptorSet::new(candidate.identity.clone(), vectors))
}

/// Walk `corpus_root`, extract every candidate and write one record per
/// usable image. Unreadable or featureless images are skipped; only a missing
/// root or a failing store aborts the run.
///
/// Extraction fans out over the current rayon pool; callers pick the pool
/// with `ThreadPool::install`.
pub fn process_dataset(
    corpus_root: &Path,
    store: &DescriptorStore,
    extractor: &dyn Extractor,
    preprocessor: &Preprocessor,
    config: &IndexConfig,
) -> Result<IndexReport> {
    let candidates = enumerate_candidates(corpus_root, &config.extensions)?;
    let total = candidates.len();
    info!(total, root = %corpus_root.display(), threads = rayon::current_num_threads(), "found images, starting extraction");

    let progress = Progress::new(total, config.progress_every);
    let indexed = index_candidates(&candidates, store, extractor, preprocessor, &progress)?;
    let report = IndexReport { candidates: total, indexed, skipped: total - indexed };
    info!(indexed = report.indexed, skipped = report.skipped, "feature extraction complete");
    Ok(report)
}

/// Index `candidates` in parallel; returns how many produced a record.
fn index_candidates(
    candidates: &[Candidate],
    store: &DescriptorStore,
    extractor: &dyn Extractor,
    preprocessor: &Preprocessor,
    progress: &Progress,
) -> Result<usize> {
    let written = candidates
        .par_iter()
        .map(|candidate| {
            let outcome = index_one(candidate, store, extractor, preprocessor);
            progress.finished();
            outcome
        })
        .collect::<Result<Vec<bool>>>()?;
    Ok(written.into_iter().filter(|w| *w).count())
}

fn index_one(
    candidate: &Candidate,
    store: &DescriptorStore,
    extractor: &dyn Extractor,
    preprocessor: &Preprocessor,
) -> Result<bool> {
    let Some(set) = extract_one(candidate, extractor, preprocessor) else {
        return Ok(false);
    };
    match store.insert(&set) {
        Ok(()) => Ok(true),
        Err(SearchError::Record(e)) => {
            warn!(identity = %set.identity, error = %e, "cannot encode record, skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Counts candidates whose work has completed and logs every `every`th.
struct Progress {
    done: AtomicUsize,
    total: usize,
    every: usize,
}

impl Progress {
    fn new(total: usize, every: usize) -> Self {
        Self { done: AtomicUsize::new(0), total, every: every.max(1) }
    }

    /// Record one finished candidate; returns the running count.
    fn finished(&self) -> usize {
        let n = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every == 0 {
            info!(done = n, total = self.total, "extraction progress");
        }
        n
    }

    #[cfg(test)]
    fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}
