use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{Index, TantivyDocument};
use tracing::debug;

use mediafuse_core::error::{Error, Result};
use mediafuse_core::traits::TextBackend;
use mediafuse_core::types::RawHit;

use crate::index::{ASR_FIELD, ID_FIELD, OCR_FIELD};

/// Which full-text field a backend instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Ocr,
    Asr,
}

impl TextField {
    fn name(self) -> &'static str {
        match self {
            TextField::Ocr => OCR_FIELD,
            TextField::Asr => ASR_FIELD,
        }
    }
}

// Tantivy's collector needs an explicit bound; this stands in for
// "unlimited" when the caller gives no count hint.
const UNBOUNDED_HITS: usize = 10_000;

/// Text backend bound to one field of the shared index.
pub struct TantivyTextBackend {
    index: Index,
    searcher: tantivy::Searcher,
    id_field: tantivy::schema::Field,
    query_field: tantivy::schema::Field,
    field: TextField,
}

impl TantivyTextBackend {
    pub fn open(index_dir: &std::path::Path, field: TextField) -> anyhow::Result<Self> {
        let index = Index::open_in_dir(index_dir)?;
        let reader = index.reader()?;
        let searcher = reader.searcher();
        let schema = index.schema();
        let id_field = schema.get_field(ID_FIELD)?;
        let query_field = schema.get_field(field.name())?;
        Ok(Self {
            index,
            searcher,
            id_field,
            query_field,
            field,
        })
    }
}

impl TextBackend for TantivyTextBackend {
    fn search(&self, query: &str, count_hint: Option<usize>) -> Result<Vec<RawHit>> {
        let parser = QueryParser::for_index(&self.index, vec![self.query_field]);
        let parsed = parser
            .parse_query(query)
            .map_err(|e| Error::Backend(format!("text query parse failed: {e}")))?;
        let limit = count_hint.unwrap_or(UNBOUNDED_HITS);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let top_docs = self
            .searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| Error::Backend(e.to_string()))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (_score, addr) in top_docs {
            let doc: TantivyDocument = self
                .searcher
                .doc(addr)
                .map_err(|e| Error::Backend(e.to_string()))?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            // Match semantics are binary; relevance grading happens in
            // the fusion engine, not here.
            hits.push(RawHit { id, distance: 0.0 });
        }
        debug!(field = ?self.field, hits = hits.len(), "text lookup");
        Ok(hits)
    }
}
