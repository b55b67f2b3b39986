//! Brute-force k=2 nearest-neighbour matching with Lowe's ratio test.

use tracing::debug;

use crate::descriptor::Descriptor;

pub const DEFAULT_RATIO: f32 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    ratio: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self { ratio: DEFAULT_RATIO }
    }
}

impl Matcher {
    pub fn new(ratio: f32) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Number of query descriptors whose nearest candidate is clearly closer
    /// than the second nearest.
    ///
    /// Degenerate inputs score 0: either side empty, a candidate with fewer
    /// than two descriptors, or mismatched dimensionality.
    pub fn score(&self, query: &[Descriptor], candidate: &[Descriptor]) -> u32 {
        if query.is_empty() || candidate.len() < 2 {
            return 0;
        }
        let dim = query[0].len();
        if let Some(bad) = query.iter().chain(candidate).find(|v| v.len() != dim) {
            debug!(expected = dim, actual = bad.len(), "dimension mismatch, scoring 0");
            return 0;
        }
        // compare squared distances: d1 < r * d2  <=>  d1^2 < r^2 * d2^2
        let ratio = f64::from(self.ratio);
        let ratio_sq = ratio * ratio;
        let good = query
            .iter()
            .filter(|q| match two_nearest(q, candidate) {
                Some((d1, d2)) => d1 < ratio_sq * d2,
                None => false,
            })
            .count();
        u32::try_from(good).unwrap_or(u32::MAX)
    }
}

/// Squared distances to the nearest and second-nearest candidate.
fn two_nearest(q: &[f32], candidate: &[Descriptor]) -> Option<(f64, f64)> {
    let mut best = f64::INFINITY;
    let mut second = f64::INFINITY;
    for c in candidate {
        let d = euclidean_distance_squared(q, c);
        if d < best {
            second = best;
            best = d;
        } else if d < second {
            second = d;
        }
    }
    if second.is_finite() { Some((best, second)) } else { None }
}

/// Squared L2 distance, unrolled by four so release builds vectorise it.
///
/// Accumulates in `f64`: squaring large stored components overflows `f32`.
/// Callers check that both slices have the same length.
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    let chunks = n / 4;
    let mut acc = [0.0f64; 4];
    for i in 0..chunks {
        let base = i * 4;
        for lane in 0..4 {
            let d = f64::from(a[base + lane]) - f64::from(b[base + lane]);
            acc[lane] += d * d;
        }
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for i in chunks * 4..n {
        let d = f64::from(a[i]) - f64::from(b[i]);
        sum += d * d;
    }
    sum
}
