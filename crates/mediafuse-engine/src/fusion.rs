//! The fusion strategies: single-modality lookups, restricted visual
//! lookups, multi-term merging and the boolean text intersection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use mediafuse_core::config::EngineSettings;
use mediafuse_core::error::{Error, Result};
use mediafuse_core::traits::{EmbeddingProvider, TextBackend, VectorBackend, VectorQuery};
use mediafuse_core::types::{MergeMode, QuerySpec, RawHit, ScoredSegment, SegmentId, VisualQuery};

use crate::dispatch;
use crate::normalize;

/// Intersections smaller than this trigger the back-fill pass.
const BACKFILL_TRIGGER_SIZE: usize = 10;
/// Recovered hits scoring below this are discarded.
const BACKFILL_MIN_SCORE: f32 = 0.17;

/// Request-scoped deadline. Checked before every backend round-trip; an
/// exceeded deadline fails the whole request, never a partial fusion.
struct Deadline(Option<Instant>);

impl Deadline {
    fn start(timeout_ms: Option<u64>) -> Self {
        Self(timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms)))
    }

    fn check(&self) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() >= at => {
                Err(Error::Backend("request deadline exceeded".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Stateless per request: holds only the collaborator handles and the
/// engine settings. OCR and ASR are separate handles so either can be
/// swapped independently.
pub struct FusionEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorBackend>,
    ocr: Arc<dyn TextBackend>,
    asr: Arc<dyn TextBackend>,
    settings: EngineSettings,
}

impl FusionEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorBackend>,
        ocr: Arc<dyn TextBackend>,
        asr: Arc<dyn TextBackend>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            embedder,
            vector,
            ocr,
            asr,
            settings,
        }
    }

    /// Evaluate one request: pick the strategy, run it, normalize and
    /// order the output, apply the limit as a post-fusion truncation.
    pub fn fuse(&self, spec: &QuerySpec) -> Result<Vec<ScoredSegment>> {
        let deadline = Deadline::start(self.settings.request_timeout_ms);
        let strategy = dispatch::select(spec)?;
        debug!(?strategy, limit = ?spec.limit, "dispatching query");

        let mut fused = match (&spec.visual, spec.ocr.as_deref(), spec.asr.as_deref()) {
            (None, Some(ocr), None) => self.text_lookup(&*self.ocr, ocr, spec.limit, &deadline)?,
            (None, None, Some(asr)) => self.text_lookup(&*self.asr, asr, spec.limit, &deadline)?,
            (Some(visual), None, None) => self.visual_only(visual, spec.limit, &deadline)?,
            (Some(visual), Some(ocr), None) => {
                let ids = self.text_ids(&*self.ocr, ocr, spec.limit, &deadline)?;
                self.restricted_visual(visual, ids, spec.limit, &deadline)?
            }
            (Some(visual), None, Some(asr)) => {
                let ids = self.text_ids(&*self.asr, asr, spec.limit, &deadline)?;
                self.restricted_visual(visual, ids, spec.limit, &deadline)?
            }
            (None, Some(ocr), Some(asr)) => self.boolean_and(ocr, asr, spec.limit, &deadline)?,
            (Some(visual), Some(ocr), Some(asr)) => {
                // First-pass, unlimited text lookups feed this
                // intersection, unlike the limit-bounded two-modality
                // restrictions.
                let ocr_ids = self.text_ids(&*self.ocr, ocr, None, &deadline)?;
                let asr_ids = self.text_ids(&*self.asr, asr, None, &deadline)?;
                self.restricted_visual(visual, &ocr_ids & &asr_ids, spec.limit, &deadline)?
            }
            (None, None, None) => {
                return Err(Error::InvalidQuery(
                    "at least one of visual, ocr or asr must be set".into(),
                ))
            }
        };

        normalize::sort_scored(&mut fused, self.settings.sort_order);
        if let Some(limit) = spec.limit {
            fused.truncate(limit);
        }
        debug!(results = fused.len(), "fusion complete");
        Ok(fused)
    }

    /// Nearest neighbors of an already-indexed segment, through the same
    /// normalize/sort/limit policy as a single-modality lookup.
    pub fn more_like(&self, example: &SegmentId, limit: Option<usize>) -> Result<Vec<ScoredSegment>> {
        let deadline = Deadline::start(self.settings.request_timeout_ms);
        deadline.check()?;
        let raw = self.vector.search_by_id(example, limit, limit)?;
        let mut scored = normalize::score_hits(raw);
        normalize::sort_scored(&mut scored, self.settings.sort_order);
        if let Some(limit) = limit {
            scored.truncate(limit);
        }
        Ok(scored)
    }

    fn visual_only(
        &self,
        visual: &VisualQuery,
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<ScoredSegment>> {
        if let [term] = visual.terms.as_slice() {
            let vector = self.embedder.embed(term)?;
            let raw = self.vector_search(vector, None, limit, deadline)?;
            return Ok(normalize::score_hits(raw));
        }
        match visual.merge_mode {
            Some(MergeMode::VectorAddition) => {
                let embeddings = self.embed_terms(&visual.terms)?;
                let mean = mean_vector(&embeddings)?;
                let raw = self.vector_search(mean, None, limit, deadline)?;
                Ok(normalize::score_hits(raw))
            }
            Some(MergeMode::IdIntersection) => {
                self.id_intersection(&visual.terms, limit, deadline)
            }
            None => Err(Error::InvalidQuery(
                "multi-term visual query requires a trailing merge mode tag".into(),
            )),
        }
    }

    /// Per-term unrestricted lookups, id-set intersection, back-fill of
    /// near misses when the intersection is thin, then run-averaging.
    fn id_intersection(
        &self,
        terms: &[String],
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<ScoredSegment>> {
        let embeddings = self.embed_terms(terms)?;
        let queries = embeddings
            .iter()
            .map(|e| VectorQuery {
                vector: e.clone(),
                restrict_to: None,
                count_hint: limit,
                index_quality: limit,
            })
            .collect();
        let mut lists: Vec<Vec<ScoredSegment>> = self
            .fan_out_vector_searches(queries, deadline)?
            .into_iter()
            .map(normalize::score_hits)
            .collect();

        let id_sets: Vec<BTreeSet<SegmentId>> = lists
            .iter()
            .map(|list| list.iter().map(|s| s.id.clone()).collect())
            .collect();
        let mut shared = id_sets.first().cloned().unwrap_or_default();
        for ids in id_sets.iter().skip(1) {
            shared = &shared & ids;
        }

        if shared.len() < BACKFILL_TRIGGER_SIZE {
            debug!(
                intersection = shared.len(),
                trigger = BACKFILL_TRIGGER_SIZE,
                "intersection thin, back-filling near misses"
            );
            // For every list, the ids it found that fell outside the
            // intersection are re-scored under each OTHER term; strong
            // recoveries rejoin that list and can complete a run.
            let mut targets = Vec::new();
            let mut probes = Vec::new();
            for (i, ids) in id_sets.iter().enumerate() {
                let extras: BTreeSet<SegmentId> = ids - &shared;
                if extras.is_empty() {
                    continue;
                }
                for (j, embedding) in embeddings.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    targets.push(i);
                    probes.push(VectorQuery {
                        vector: embedding.clone(),
                        restrict_to: Some(extras.clone()),
                        count_hint: limit,
                        index_quality: limit,
                    });
                }
            }
            let recovered = self.fan_out_vector_searches(probes, deadline)?;
            for (i, raw) in targets.into_iter().zip(recovered) {
                lists[i].extend(
                    normalize::score_hits(raw)
                        .into_iter()
                        .filter(|s| s.score >= BACKFILL_MIN_SCORE),
                );
            }
        }

        Ok(average_runs(
            lists.into_iter().flatten().collect(),
            terms.len(),
        ))
    }

    /// Vector lookup(s) over a pre-computed eligible id set. An empty
    /// set is a valid request with an empty answer, not an error.
    fn restricted_visual(
        &self,
        visual: &VisualQuery,
        ids: BTreeSet<SegmentId>,
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<ScoredSegment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed_terms(&visual.terms)?;
        let queries = embeddings
            .iter()
            .map(|e| VectorQuery {
                vector: e.clone(),
                restrict_to: Some(ids.clone()),
                count_hint: limit,
                index_quality: limit,
            })
            .collect();
        let mut lists: Vec<Vec<ScoredSegment>> = self
            .fan_out_vector_searches(queries, deadline)?
            .into_iter()
            .map(normalize::score_hits)
            .collect();

        if visual.terms.len() == 1 {
            return Ok(lists.pop().unwrap_or_default());
        }
        Ok(average_runs(
            lists.into_iter().flatten().collect(),
            visual.terms.len(),
        ))
    }

    /// Presence is binary here: ids matching both text fields score a
    /// flat 1.
    fn boolean_and(
        &self,
        ocr: &str,
        asr: &str,
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<ScoredSegment>> {
        let ocr_ids = self.text_ids(&*self.ocr, ocr, limit, deadline)?;
        let asr_ids = self.text_ids(&*self.asr, asr, limit, deadline)?;
        Ok((&ocr_ids & &asr_ids)
            .into_iter()
            .map(|id| ScoredSegment { id, score: 1.0 })
            .collect())
    }

    fn text_lookup(
        &self,
        backend: &dyn TextBackend,
        query: &str,
        count_hint: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<ScoredSegment>> {
        deadline.check()?;
        Ok(normalize::score_hits(backend.search(query, count_hint)?))
    }

    fn text_ids(
        &self,
        backend: &dyn TextBackend,
        query: &str,
        count_hint: Option<usize>,
        deadline: &Deadline,
    ) -> Result<BTreeSet<SegmentId>> {
        Ok(self
            .text_lookup(backend, query, count_hint, deadline)?
            .into_iter()
            .map(|s| s.id)
            .collect())
    }

    fn vector_search(
        &self,
        vector: Vec<f32>,
        restrict_to: Option<BTreeSet<SegmentId>>,
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<RawHit>> {
        deadline.check()?;
        // The limit doubles as the index-quality hint so the index
        // yields at least that many true-ish nearest neighbors.
        self.vector.search(&VectorQuery {
            vector,
            restrict_to,
            count_hint: limit,
            index_quality: limit,
        })
    }

    fn embed_terms(&self, terms: &[String]) -> Result<Vec<Vec<f32>>> {
        terms.iter().map(|t| self.embedder.embed(t)).collect()
    }

    /// Sibling lookups have no data dependency on each other, so they
    /// run on scoped worker threads, at most `max_fanout` at a time.
    /// Results come back in input order, which keeps aggregation
    /// deterministic.
    fn fan_out_vector_searches(
        &self,
        queries: Vec<VectorQuery>,
        deadline: &Deadline,
    ) -> Result<Vec<Vec<RawHit>>> {
        if queries.len() <= 1 {
            return queries
                .into_iter()
                .map(|q| {
                    deadline.check()?;
                    self.vector.search(&q)
                })
                .collect();
        }
        let backend = self.vector.as_ref();
        let max = self.settings.max_fanout.max(1);
        let mut results = Vec::with_capacity(queries.len());
        let mut pending = queries.into_iter();
        loop {
            let batch: Vec<VectorQuery> = pending.by_ref().take(max).collect();
            if batch.is_empty() {
                break;
            }
            let joined: Vec<Result<Vec<RawHit>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|q| {
                        scope.spawn(move || {
                            deadline.check()?;
                            backend.search(q)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| match h.join() {
                        Ok(result) => result,
                        Err(_) => Err(Error::Backend("vector search worker panicked".into())),
                    })
                    .collect()
            });
            for r in joined {
                results.push(r?);
            }
        }
        Ok(results)
    }
}

/// Element-wise arithmetic mean of the sub-term embeddings.
fn mean_vector(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let dim = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| Error::Embedding("cannot average zero embedding vectors".into()))?;
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(Error::Embedding(format!(
                "embedding dimension mismatch: {} vs {}",
                v.len(),
                dim
            )));
        }
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= vectors.len() as f32;
    }
    Ok(mean)
}

/// Sort the pooled per-term lists by id, scan contiguous equal-id runs,
/// and emit one averaged entry per run of at least `min_run` members —
/// the id was confirmed, directly or via back-fill, under every term.
fn average_runs(mut pooled: Vec<ScoredSegment>, min_run: usize) -> Vec<ScoredSegment> {
    pooled.sort_by(|a, b| a.id.cmp(&b.id));
    let mut out = Vec::new();
    let mut i = 0;
    while i < pooled.len() {
        let mut j = i + 1;
        while j < pooled.len() && pooled[j].id == pooled[i].id {
            j += 1;
        }
        let run = &pooled[i..j];
        if run.len() >= min_run {
            let mean = run.iter().map(|s| s.score).sum::<f32>() / run.len() as f32;
            out.push(ScoredSegment {
                id: run[0].id.clone(),
                score: mean,
            });
        }
        // advance by the run length, not by one
        i = j;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_vector_is_elementwise_average() {
        let mean = mean_vector(&[vec![1.0, 3.0], vec![3.0, 5.0]]).expect("mean");
        assert_eq!(mean, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_vector_rejects_dim_mismatch() {
        let err = mean_vector(&[vec![1.0, 2.0], vec![1.0]]).expect_err("mismatch");
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn average_runs_thresholds_on_run_length() {
        let pooled = vec![
            ScoredSegment { id: "b".into(), score: 0.8 },
            ScoredSegment { id: "a".into(), score: 0.9 },
            ScoredSegment { id: "b".into(), score: 0.6 },
        ];
        let out = average_runs(pooled, 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
        assert!((out[0].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn average_runs_advances_by_run_length() {
        // Three entries for one id form one run of 3, not overlapping
        // runs of 2.
        let pooled = vec![
            ScoredSegment { id: "x".into(), score: 0.3 },
            ScoredSegment { id: "x".into(), score: 0.6 },
            ScoredSegment { id: "x".into(), score: 0.9 },
        ];
        let out = average_runs(pooled, 2);
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.6).abs() < 1e-6);
    }
}
