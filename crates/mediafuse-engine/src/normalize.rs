//! Raw-hit normalization: identity dedup, distance-to-score conversion
//! and the final ordering.

use std::cmp::Ordering;
use std::collections::HashSet;

use mediafuse_core::types::{RawHit, ScoredSegment, SortOrder};

/// Collapse identical `(id, distance)` tuples, then convert distance to
/// `score = 1 - distance`.
///
/// Differing distances for the same id do NOT collapse here; that is the
/// job of the fusion averaging step, not the normalizer.
pub fn score_hits(raw: Vec<RawHit>) -> Vec<ScoredSegment> {
    let mut seen: HashSet<(String, u32)> = HashSet::with_capacity(raw.len());
    let mut out = Vec::with_capacity(raw.len());
    for hit in raw {
        if seen.insert((hit.id.clone(), hit.distance.to_bits())) {
            out.push(ScoredSegment {
                id: hit.id,
                score: 1.0 - hit.distance,
            });
        }
    }
    out
}

/// Order by score in the configured direction, ties broken by id so
/// repeated evaluations of the same request are byte-identical.
pub fn sort_scored(items: &mut [ScoredSegment], order: SortOrder) {
    items.sort_by(|a, b| {
        let by_score = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
        let by_score = match order {
            SortOrder::Ascending => by_score,
            SortOrder::Descending => by_score.reverse(),
        };
        by_score.then_with(|| a.id.cmp(&b.id))
    });
}
