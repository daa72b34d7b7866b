use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use mediafuse_core::config::EngineSettings;
use mediafuse_core::traits::{EmbeddingProvider, TextBackend, VectorBackend, VectorQuery};
use mediafuse_core::types::{QuerySpec, RawHit, ScoredSegment, SegmentId, SortOrder};
use mediafuse_core::Error;
use mediafuse_engine::FusionEngine;

/// Deterministic test embedder: distinct terms map to distinct vectors,
/// so scripted backends can key fixtures by exact vector equality.
struct TermEmbedder;

impl EmbeddingProvider for TermEmbedder {
    fn dim(&self) -> usize {
        4
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, Error> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("empty input text".into()));
        }
        let mut v = vec![0.0f32; 4];
        for (i, b) in text.bytes().enumerate() {
            v[i % 4] += f32::from(b);
        }
        Ok(v)
    }
}

fn embed(text: &str) -> Vec<f32> {
    TermEmbedder.embed(text).expect("embed fixture term")
}

fn hit(id: &str, distance: f32) -> RawHit {
    RawHit {
        id: id.to_string(),
        distance,
    }
}

/// Scripted vector backend. `top` holds the unrestricted answer per
/// query vector; `reachable` holds additional rows that only surface
/// under a candidate restriction, the way an ANN index returns rows
/// outside its own top-K once the search space is narrowed.
#[derive(Default)]
struct ScriptedVectorBackend {
    top: Vec<(Vec<f32>, Vec<RawHit>)>,
    reachable: Vec<(Vec<f32>, Vec<RawHit>)>,
    by_example: Vec<(SegmentId, Vec<RawHit>)>,
    calls: Mutex<Vec<VectorQuery>>,
    fail: bool,
}

impl ScriptedVectorBackend {
    fn with_top(mut self, term: &str, hits: Vec<RawHit>) -> Self {
        self.top.push((embed(term), hits));
        self
    }

    fn with_reachable(mut self, term: &str, hits: Vec<RawHit>) -> Self {
        self.reachable.push((embed(term), hits));
        self
    }

    fn calls(&self) -> Vec<VectorQuery> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl VectorBackend for ScriptedVectorBackend {
    fn search(&self, query: &VectorQuery) -> Result<Vec<RawHit>, Error> {
        if self.fail {
            return Err(Error::Backend("vector index unavailable".into()));
        }
        self.calls.lock().expect("calls lock").push(query.clone());

        let lookup = |table: &Vec<(Vec<f32>, Vec<RawHit>)>| {
            table
                .iter()
                .find(|(v, _)| v == &query.vector)
                .map(|(_, h)| h.clone())
                .unwrap_or_default()
        };
        let mut hits = lookup(&self.top);
        let hits = match &query.restrict_to {
            Some(ids) => {
                hits.extend(lookup(&self.reachable));
                hits.into_iter().filter(|h| ids.contains(&h.id)).collect()
            }
            None => hits,
        };
        Ok(match query.count_hint {
            Some(n) => hits.into_iter().take(n).collect(),
            None => hits,
        })
    }

    fn search_by_id(
        &self,
        example: &SegmentId,
        count_hint: Option<usize>,
        _index_quality: Option<usize>,
    ) -> Result<Vec<RawHit>, Error> {
        if self.fail {
            return Err(Error::Backend("vector index unavailable".into()));
        }
        let hits = self
            .by_example
            .iter()
            .find(|(id, _)| id == example)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| Error::Backend(format!("example segment not found: {example}")))?;
        Ok(match count_hint {
            Some(n) => hits.into_iter().take(n).collect(),
            None => hits,
        })
    }
}

/// Scripted text backend: a fixed id list, binary matches only.
#[derive(Default)]
struct ScriptedTextBackend {
    ids: Vec<&'static str>,
    calls: Mutex<Vec<(String, Option<usize>)>>,
    fail: bool,
}

impl ScriptedTextBackend {
    fn with_ids(ids: Vec<&'static str>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Option<usize>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl TextBackend for ScriptedTextBackend {
    fn search(&self, query: &str, count_hint: Option<usize>) -> Result<Vec<RawHit>, Error> {
        if self.fail {
            return Err(Error::Backend("text index unavailable".into()));
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push((query.to_string(), count_hint));
        let hits = self.ids.iter().map(|id| hit(id, 0.0));
        Ok(match count_hint {
            Some(n) => hits.take(n).collect(),
            None => hits.collect(),
        })
    }
}

struct Fixture {
    vector: Arc<ScriptedVectorBackend>,
    ocr: Arc<ScriptedTextBackend>,
    asr: Arc<ScriptedTextBackend>,
    engine: FusionEngine,
}

fn fixture(
    vector: ScriptedVectorBackend,
    ocr: ScriptedTextBackend,
    asr: ScriptedTextBackend,
    settings: EngineSettings,
) -> Fixture {
    let vector = Arc::new(vector);
    let ocr = Arc::new(ocr);
    let asr = Arc::new(asr);
    let engine = FusionEngine::new(
        Arc::new(TermEmbedder),
        vector.clone(),
        ocr.clone(),
        asr.clone(),
        settings,
    );
    Fixture {
        vector,
        ocr,
        asr,
        engine,
    }
}

fn spec(visual: Option<&str>, ocr: Option<&str>, asr: Option<&str>, limit: Option<usize>) -> QuerySpec {
    QuerySpec::from_fields(visual, ocr, asr, limit).expect("valid spec")
}

fn ids_of(results: &[ScoredSegment]) -> Vec<&str> {
    results.iter().map(|s| s.id.as_str()).collect()
}

fn score_of<'a>(results: &'a [ScoredSegment], id: &str) -> f32 {
    results
        .iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("id {id} missing from results"))
        .score
}

#[test]
fn no_modality_is_invalid() {
    let err = QuerySpec::from_fields(None, None, None, None).expect_err("invalid");
    assert!(matches!(err, Error::InvalidQuery(_)));
}

#[test]
fn single_visual_lookup_scores_and_sorts_descending() {
    let f = fixture(
        ScriptedVectorBackend::default()
            .with_top("sunset", vec![hit("s2", 0.4), hit("s1", 0.1), hit("s3", 0.7)]),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f.engine.fuse(&spec(Some("sunset"), None, None, None)).expect("fuse");
    assert_eq!(ids_of(&out), vec!["s1", "s2", "s3"]);
    assert!((score_of(&out, "s1") - 0.9).abs() < 1e-6);
}

#[test]
fn legacy_ascending_sort_is_available() {
    let settings = EngineSettings {
        sort_order: SortOrder::Ascending,
        ..EngineSettings::default()
    };
    let f = fixture(
        ScriptedVectorBackend::default()
            .with_top("sunset", vec![hit("s1", 0.1), hit("s2", 0.4)]),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        settings,
    );
    let out = f.engine.fuse(&spec(Some("sunset"), None, None, None)).expect("fuse");
    assert_eq!(ids_of(&out), vec!["s2", "s1"], "least relevant first");
}

#[test]
fn duplicate_raw_rows_collapse_to_one() {
    let f = fixture(
        ScriptedVectorBackend::default()
            .with_top("beach", vec![hit("s1", 0.2), hit("s1", 0.2), hit("s2", 0.5)]),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f.engine.fuse(&spec(Some("beach"), None, None, None)).expect("fuse");
    assert_eq!(ids_of(&out), vec!["s1", "s2"]);
}

#[test]
fn limit_bounds_output_and_reaches_the_backend() {
    let f = fixture(
        ScriptedVectorBackend::default().with_top(
            "city",
            vec![hit("s1", 0.1), hit("s2", 0.2), hit("s3", 0.3), hit("s4", 0.4)],
        ),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f.engine.fuse(&spec(Some("city"), None, None, Some(2))).expect("fuse");
    assert!(out.len() <= 2);

    let calls = f.vector.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].count_hint, Some(2));
    assert_eq!(calls[0].index_quality, Some(2), "limit doubles as quality hint");
}

#[test]
fn ocr_only_lookup_returns_binary_scores() {
    let f = fixture(
        ScriptedVectorBackend::default(),
        ScriptedTextBackend::with_ids(vec!["a", "b"]),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f.engine.fuse(&spec(None, Some("stop"), None, None)).expect("fuse");
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|s| (s.score - 1.0).abs() < 1e-6));
}

#[test]
fn boolean_and_is_exactly_the_intersection_scored_one() {
    let f = fixture(
        ScriptedVectorBackend::default(),
        ScriptedTextBackend::with_ids(vec!["a", "b", "c"]),
        ScriptedTextBackend::with_ids(vec!["b", "c", "d"]),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(None, Some("stop"), Some("hello"), None))
        .expect("fuse");
    let got: BTreeSet<&str> = out.iter().map(|s| s.id.as_str()).collect();
    let want: BTreeSet<&str> = ["b", "c"].into_iter().collect();
    assert_eq!(got, want, "no extras, no omissions");
    assert!(out.iter().all(|s| (s.score - 1.0).abs() < 1e-6));
}

#[test]
fn vector_addition_queries_with_the_mean_vector_once() {
    let e1 = embed("cat");
    let e2 = embed("dog");
    let mean: Vec<f32> = e1.iter().zip(&e2).map(|(a, b)| (a + b) / 2.0).collect();

    let vector = ScriptedVectorBackend {
        top: vec![(mean.clone(), vec![hit("s1", 0.2), hit("s2", 0.3)])],
        ..ScriptedVectorBackend::default()
    };
    let f = fixture(
        vector,
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let query = spec(Some("cat#dog#vector_addition"), None, None, None);
    let out = f.engine.fuse(&query).expect("fuse");
    assert_eq!(ids_of(&out), vec!["s1", "s2"]);

    let calls = f.vector.calls();
    assert_eq!(calls.len(), 1, "one backend call for vector addition");
    assert_eq!(calls[0].vector, mean);

    // Same inputs, same backend state: identical output.
    let again = f.engine.fuse(&query).expect("fuse again");
    assert_eq!(out, again);
}

#[test]
fn multi_term_visual_without_tag_is_invalid() {
    let f = fixture(
        ScriptedVectorBackend::default(),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let err = f
        .engine
        .fuse(&spec(Some("cat#dog"), None, None, None))
        .expect_err("must fail");
    assert!(matches!(err, Error::InvalidQuery(_)));
}

/// The worked end-to-end example: "cat" hits {1,2,3}, "dog" hits
/// {2,3,4}; the thin intersection {2,3} triggers back-fill. Id 1 scores
/// 0.1 under "dog" (below the 0.17 floor, dropped); id 4 scores 0.5
/// under "cat" (kept, completing its run).
#[test]
fn id_intersection_backfill_end_to_end() {
    let vector = ScriptedVectorBackend::default()
        .with_top("cat", vec![hit("1", 0.1), hit("2", 0.2), hit("3", 0.3)])
        .with_top("dog", vec![hit("2", 0.15), hit("3", 0.25), hit("4", 0.4)])
        .with_reachable("cat", vec![hit("4", 0.5)])
        .with_reachable("dog", vec![hit("1", 0.9)]);
    let f = fixture(
        vector,
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("cat#dog#id_intersection"), None, None, None))
        .expect("fuse");

    let got: BTreeSet<&str> = out.iter().map(|s| s.id.as_str()).collect();
    let want: BTreeSet<&str> = ["2", "3", "4"].into_iter().collect();
    assert_eq!(got, want);

    // Means of the contributing scores per id.
    assert!((score_of(&out, "2") - 0.825).abs() < 1e-6); // (0.8 + 0.85) / 2
    assert!((score_of(&out, "3") - 0.725).abs() < 1e-6); // (0.7 + 0.75) / 2
    assert!((score_of(&out, "4") - 0.55).abs() < 1e-6); // (0.6 + 0.5) / 2

    // Id 1 was recovered at 0.1 < 0.17 and must never appear.
    assert!(!out.iter().any(|s| s.id == "1"));
}

#[test]
fn id_intersection_drops_ids_missing_from_any_term() {
    // Intersection is large enough that no back-fill runs; id "only-a"
    // appears under one term only and is dropped by the run threshold.
    let a_hits: Vec<RawHit> = (0..10)
        .map(|i| hit(&format!("c{i}"), 0.1))
        .chain([hit("only-a", 0.05)])
        .collect();
    let b_hits: Vec<RawHit> = (0..10).map(|i| hit(&format!("c{i}"), 0.2)).collect();
    let vector = ScriptedVectorBackend::default()
        .with_top("cat", a_hits)
        .with_top("dog", b_hits);
    let f = fixture(
        vector,
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("cat#dog#id_intersection"), None, None, None))
        .expect("fuse");

    assert_eq!(out.len(), 10);
    assert!(!out.iter().any(|s| s.id == "only-a"));
    // Mean of 0.9 and 0.8 for every shared id.
    assert!(out.iter().all(|s| (s.score - 0.85).abs() < 1e-6));
    // No restricted probes were issued.
    assert!(f.vector.calls().iter().all(|c| c.restrict_to.is_none()));
}

#[test]
fn visual_with_ocr_restricts_to_limited_text_ids() {
    let vector = ScriptedVectorBackend::default()
        .with_top("sign", vec![hit("a", 0.1), hit("b", 0.2), hit("z", 0.3)])
        .with_reachable("sign", vec![]);
    let f = fixture(
        vector,
        ScriptedTextBackend::with_ids(vec!["a", "b", "c"]),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("sign"), Some("stop"), None, Some(2)))
        .expect("fuse");

    // Text lookup was bounded by the limit, so only {a, b} are eligible.
    assert_eq!(f.ocr.calls(), vec![("stop".to_string(), Some(2))]);
    let calls = f.vector.calls();
    assert_eq!(calls.len(), 1);
    let restriction = calls[0].restrict_to.clone().expect("restricted");
    let want: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    assert_eq!(restriction, want);
    assert!(ids_of(&out).iter().all(|id| want.contains(*id)));
}

#[test]
fn empty_text_restriction_yields_empty_not_error() {
    let f = fixture(
        ScriptedVectorBackend::default().with_top("sign", vec![hit("a", 0.1)]),
        ScriptedTextBackend::with_ids(vec![]),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("sign"), Some("nowhere"), None, None))
        .expect("fuse");
    assert!(out.is_empty());
    assert!(f.vector.calls().is_empty(), "no vector query for an empty set");
}

#[test]
fn three_modality_uses_unlimited_text_passes() {
    let vector = ScriptedVectorBackend::default()
        .with_top("sign", vec![hit("b", 0.1), hit("c", 0.2)])
        .with_reachable("sign", vec![]);
    let f = fixture(
        vector,
        ScriptedTextBackend::with_ids(vec!["a", "b", "c"]),
        ScriptedTextBackend::with_ids(vec!["b", "c", "d"]),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("sign"), Some("stop"), Some("hello"), Some(1)))
        .expect("fuse");

    // First-pass text lookups ignore the limit; only the final output is
    // truncated.
    assert_eq!(f.ocr.calls(), vec![("stop".to_string(), None)]);
    assert_eq!(f.asr.calls(), vec![("hello".to_string(), None)]);
    let restriction = f.vector.calls()[0].restrict_to.clone().expect("restricted");
    let want: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(restriction, want);
    assert_eq!(out.len(), 1);
}

#[test]
fn three_modality_multi_term_averages_restricted_lists() {
    let vector = ScriptedVectorBackend::default()
        .with_reachable("cat", vec![hit("b", 0.2), hit("c", 0.4)])
        .with_reachable("dog", vec![hit("b", 0.3)]);
    let f = fixture(
        vector,
        ScriptedTextBackend::with_ids(vec!["b", "c"]),
        ScriptedTextBackend::with_ids(vec!["b", "c"]),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .fuse(&spec(Some("cat#dog"), Some("stop"), Some("hello"), None))
        .expect("fuse");

    // "b" confirmed under both terms, mean of 0.8 and 0.7; "c" seen only
    // under "cat" and dropped. No back-fill in this strategy.
    assert_eq!(ids_of(&out), vec!["b"]);
    assert!((score_of(&out, "b") - 0.75).abs() < 1e-6);
    assert_eq!(f.vector.calls().len(), 2, "one restricted query per sub-term");
}

#[test]
fn backend_failure_aborts_the_whole_request() {
    let f = fixture(
        ScriptedVectorBackend {
            fail: true,
            ..ScriptedVectorBackend::default()
        },
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let err = f
        .engine
        .fuse(&spec(Some("sunset"), None, None, None))
        .expect_err("must fail");
    assert!(matches!(err, Error::Backend(_)));

    let f = fixture(
        ScriptedVectorBackend::default(),
        ScriptedTextBackend {
            fail: true,
            ..ScriptedTextBackend::default()
        },
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let err = f
        .engine
        .fuse(&spec(None, Some("stop"), None, None))
        .expect_err("must fail");
    assert!(matches!(err, Error::Backend(_)));
}

#[test]
fn exceeded_deadline_fails_before_any_backend_call() {
    let settings = EngineSettings {
        request_timeout_ms: Some(0),
        ..EngineSettings::default()
    };
    let f = fixture(
        ScriptedVectorBackend::default().with_top("sunset", vec![hit("s1", 0.1)]),
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        settings,
    );
    let err = f
        .engine
        .fuse(&spec(Some("sunset"), None, None, None))
        .expect_err("must fail");
    assert!(matches!(err, Error::Backend(_)));
    assert!(f.vector.calls().is_empty());
}

#[test]
fn fan_out_bound_of_one_still_joins_in_input_order() {
    let settings = EngineSettings {
        max_fanout: 1,
        ..EngineSettings::default()
    };
    let vector = ScriptedVectorBackend::default()
        .with_top("cat", vec![hit("x", 0.1), hit("y", 0.2)])
        .with_top("dog", vec![hit("x", 0.3), hit("y", 0.4)])
        .with_reachable("cat", vec![])
        .with_reachable("dog", vec![]);
    let f = fixture(
        vector,
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        settings,
    );
    let out = f
        .engine
        .fuse(&spec(Some("cat#dog#id_intersection"), None, None, None))
        .expect("fuse");
    assert_eq!(ids_of(&out), vec!["x", "y"]);
    assert!((score_of(&out, "x") - 0.8).abs() < 1e-6);
}

#[test]
fn more_like_excludes_nothing_but_scores_and_limits() {
    let vector = ScriptedVectorBackend {
        by_example: vec![(
            "seed".to_string(),
            vec![hit("n1", 0.1), hit("n2", 0.2), hit("n3", 0.3)],
        )],
        ..ScriptedVectorBackend::default()
    };
    let f = fixture(
        vector,
        ScriptedTextBackend::default(),
        ScriptedTextBackend::default(),
        EngineSettings::default(),
    );
    let out = f
        .engine
        .more_like(&"seed".to_string(), Some(2))
        .expect("more_like");
    assert_eq!(ids_of(&out), vec!["n1", "n2"]);
    assert!((score_of(&out, "n1") - 0.9).abs() < 1e-6);

    let err = f
        .engine
        .more_like(&"missing".to_string(), None)
        .expect_err("unknown example");
    assert!(matches!(err, Error::Backend(_)));
}
