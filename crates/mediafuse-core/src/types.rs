//! Domain types shared by the fusion engine and the backend adapters.

use serde::{Deserialize, Serialize};

/// Opaque segment identifier, unique per segment and stable across
/// queries within one corpus.
pub type SegmentId = String;

/// One row as returned by a backend, before deduplication and scoring.
///
/// The vector backend may emit the same `(id, distance)` tuple more than
/// once (an index artifact); identical tuples are collapsed by the
/// normalizer. Distance is cosine distance on L2-normalized vectors,
/// so it lives in [0, 2].
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: SegmentId,
    pub distance: f32,
}

/// Final output element: higher `score` means more relevant.
///
/// Each contributing term scores within [-1, 1] (`1 - distance`), but an
/// averaged score is not re-bounded. At most one entry per id may appear
/// in one result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSegment {
    pub id: SegmentId,
    pub score: f32,
}

/// How multiple visual sub-terms are fused in a visual-only query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Average the sub-term embeddings element-wise, then issue a single
    /// vector query.
    VectorAddition,
    /// Query once per sub-term, intersect the id sets, back-fill near
    /// misses, and average scores per id.
    IdIntersection,
}

impl MergeMode {
    /// Recognize the trailing merge-mode tag of a `#`-delimited visual
    /// field.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "vector_addition" => Some(Self::VectorAddition),
            "id_intersection" => Some(Self::IdIntersection),
            _ => None,
        }
    }
}

/// Direction of the final ordering by score.
///
/// `Ascending` reproduces the legacy least-relevant-first behavior and is
/// kept only as an explicit opt-in; `Descending` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// The visual-similarity part of a query: one or more free-text
/// sub-terms plus the merge mode parsed from the trailing tag.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualQuery {
    pub terms: Vec<String>,
    pub merge_mode: Option<MergeMode>,
}

/// A parsed retrieval request. At least one modality field must be set;
/// `limit`, when present, bounds both the backend result-count hint and
/// the final output length. Request-scoped, nothing persists.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub visual: Option<VisualQuery>,
    pub ocr: Option<String>,
    pub asr: Option<String>,
    pub limit: Option<usize>,
}

/// One corpus record as ingested by the indexer: the caption feeds the
/// vector table, `ocr`/`asr` feed the full-text fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub caption: String,
    #[serde(default)]
    pub ocr: String,
    #[serde(default)]
    pub asr: String,
}
