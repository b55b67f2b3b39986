use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::descriptor::{Descriptor, DescriptorSet, MatchResult};
use crate::matcher::Matcher;
use crate::store::DescriptorStore;

pub const DEFAULT_MIN_SCORE: u32 = 4;

/// Stored sets decoded and scored per parallel batch; bounds memory on large stores.
const SCORE_BATCH: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    pub results: Vec<MatchResult>,
    /// Stored sets scored against the query.
    pub scanned: usize,
    /// Stored records skipped as unreadable.
    pub skipped: usize,
    /// Candidates above the threshold before truncation.
    pub total_hits: usize,
}

/// Top `top_n` stored sets scoring strictly above `min_score`, best first.
pub fn search(query: &[Descriptor], store: &DescriptorStore, matcher: &Matcher, top_n: usize, min_score: u32) -> Vec<MatchResult> {
    search_detailed(query, store, matcher, top_n, min_score).results
}

#[instrument(skip(query, store, matcher), fields(query_len = query.len()))]
pub fn search_detailed(
    query: &[Descriptor],
    store: &DescriptorStore,
    matcher: &Matcher,
    top_n: usize,
    min_score: u32,
) -> Ranking {
    let mut sets = store.load_all();
    let mut hits: Vec<MatchResult> = Vec::new();
    let mut scanned = 0;
    loop {
        let batch: Vec<DescriptorSet> = sets.by_ref().take(SCORE_BATCH).collect();
        if batch.is_empty() {
            break;
        }
        scanned += batch.len();
        hits.par_extend(batch.into_par_iter().filter_map(|set| {
            let score = matcher.score(query, &set.vectors);
            (score > min_score).then(|| MatchResult { identity: set.identity, score })
        }));
    }
    let total_hits = hits.len();
    let results = rank(hits, top_n);
    debug!(scanned, skipped = sets.skipped(), total_hits, returned = results.len(), "ranking complete");
    Ranking { results, scanned, skipped: sets.skipped(), total_hits }
}

/// Sort by descending score, ties by ascending identity, then truncate.
pub fn rank(mut hits: Vec<MatchResult>, top_n: usize) -> Vec<MatchResult> {
    hits.sort_by(compare);
    hits.truncate(top_n);
    hits
}

fn compare(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.score.cmp(&a.score).then_with(|| a.identity.cmp(&b.identity))
}
