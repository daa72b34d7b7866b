use anyhow::Result;
use std::path::Path;
use tantivy::schema::{Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index};

use mediafuse_core::types::SegmentRecord;

pub(crate) const ID_FIELD: &str = "id";
pub(crate) const OCR_FIELD: &str = "ocr_text";
pub(crate) const ASR_FIELD: &str = "asr_text";

pub(crate) fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    let _id = schema_builder.add_text_field(ID_FIELD, STRING | STORED);
    let _ocr = schema_builder.add_text_field(OCR_FIELD, TEXT);
    let _asr = schema_builder.add_text_field(ASR_FIELD, TEXT);
    schema_builder.build()
}

/// Writes segment OCR/ASR text into a fresh index directory.
pub struct SegmentTextWriter {
    index: Index,
    id_field: tantivy::schema::Field,
    ocr_field: tantivy::schema::Field,
    asr_field: tantivy::schema::Field,
}

impl SegmentTextWriter {
    /// Creates the index directory, replacing any previous contents.
    pub fn create(index_dir: &Path) -> Result<Self> {
        let schema = build_schema();
        if index_dir.exists() {
            std::fs::remove_dir_all(index_dir)?;
        }
        std::fs::create_dir_all(index_dir)?;
        let index = Index::create_in_dir(index_dir, schema.clone())?;
        let id_field = schema.get_field(ID_FIELD)?;
        let ocr_field = schema.get_field(OCR_FIELD)?;
        let asr_field = schema.get_field(ASR_FIELD)?;
        Ok(Self {
            index,
            id_field,
            ocr_field,
            asr_field,
        })
    }

    pub fn add_segments(&self, records: &[SegmentRecord]) -> Result<usize> {
        let mut index_writer = self.index.writer(50_000_000)?;
        let mut count = 0;
        for r in records {
            let doc = doc!(
                self.id_field => r.id.clone(),
                self.ocr_field => r.ocr.clone(),
                self.asr_field => r.asr.clone(),
            );
            index_writer.add_document(doc)?;
            count += 1;
        }
        index_writer.commit()?;
        Ok(count)
    }
}
