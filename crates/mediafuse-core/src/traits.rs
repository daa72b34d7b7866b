//! Backend interfaces consumed by the fusion engine.
//!
//! All collaborators are read-only query surfaces: the engine never
//! mutates them. OCR and ASR are distinct `TextBackend` handles so a
//! real ASR index can replace the current one without touching fusion
//! logic.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{RawHit, SegmentId};

/// Maps free text to a fixed-length, L2-normalized vector.
/// Deterministic for a given model version.
pub trait EmbeddingProvider: Send + Sync {
    fn dim(&self) -> usize;
    /// Fails with `Error::Embedding` on empty or invalid input.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One ANN lookup. The candidate restriction is structured data; the
/// adapter picks its own representation (never caller-built query text).
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    /// When set, only these ids are eligible. An empty set is valid and
    /// yields an empty result.
    pub restrict_to: Option<BTreeSet<SegmentId>>,
    pub count_hint: Option<usize>,
    /// Runtime index-quality knob, so the index returns at least
    /// `count_hint` true-ish nearest neighbors.
    pub index_quality: Option<usize>,
}

pub trait VectorBackend: Send + Sync {
    /// Returns `(id, distance)` pairs ordered by ascending distance.
    fn search(&self, query: &VectorQuery) -> Result<Vec<RawHit>>;

    /// Nearest neighbors of an already-indexed segment's own vector,
    /// excluding the example id itself.
    fn search_by_id(
        &self,
        example: &SegmentId,
        count_hint: Option<usize>,
        index_quality: Option<usize>,
    ) -> Result<Vec<RawHit>>;
}

/// Full-text lookup over one field (OCR or ASR, fixed at construction).
/// Matches are binary: every hit carries distance 0.
pub trait TextBackend: Send + Sync {
    fn search(&self, query: &str, count_hint: Option<usize>) -> Result<Vec<RawHit>>;
}
