use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arrow_array::{FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::{connect, Connection};
use tracing::info;

use mediafuse_core::traits::EmbeddingProvider;
use mediafuse_core::types::SegmentRecord;

const BATCH_SIZE: usize = 1000;

/// Embeds segment captions and writes `(id, caption, vector)` rows into
/// a LanceDB table.
pub struct LanceSegmentWriter {
    db: Connection,
    table_name: String,
    provider: Arc<dyn EmbeddingProvider>,
    runtime: tokio::runtime::Runtime,
}

impl LanceSegmentWriter {
    pub fn open(
        db_path: &Path,
        table_name: &str,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let db = runtime
            .block_on(connect(db_path.to_string_lossy().as_ref()).execute())?;
        Ok(Self {
            db,
            table_name: table_name.to_string(),
            provider,
            runtime,
        })
    }

    pub fn index_segments(&self, records: &[SegmentRecord]) -> Result<()> {
        if records.is_empty() {
            info!("no segments to index");
            return Ok(());
        }
        info!(
            count = records.len(),
            table = %self.table_name,
            "indexing segments into LanceDB"
        );
        let pb = ProgressBar::new(records.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        for (i, record) in records.iter().enumerate() {
            let vector = self
                .provider
                .embed(&record.caption)
                .map_err(|e| anyhow::anyhow!("embedding segment {}: {}", record.id, e))?;
            batch.push((record, vector));
            pb.set_position(i as u64 + 1);
            if batch.len() >= BATCH_SIZE || i == records.len() - 1 {
                self.insert_batch(&batch)?;
                batch.clear();
            }
        }
        pb.finish_with_message("LanceDB indexing completed");
        Ok(())
    }

    fn insert_batch(&self, rows: &[(&SegmentRecord, Vec<f32>)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let record_batch = self.rows_to_record_batch(rows)?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(
            vec![Ok(record_batch)].into_iter(),
            schema,
        ));
        self.runtime.block_on(async {
            if self
                .db
                .table_names()
                .execute()
                .await?
                .contains(&self.table_name)
            {
                self.db
                    .open_table(&self.table_name)
                    .execute()
                    .await?
                    .add(reader)
                    .execute()
                    .await?;
            } else {
                self.db
                    .create_table(&self.table_name, reader)
                    .execute()
                    .await?;
            }
            Ok(())
        })
    }

    fn rows_to_record_batch(&self, rows: &[(&SegmentRecord, Vec<f32>)]) -> Result<RecordBatch> {
        let dim = self.provider.dim();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("caption", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dim as i32,
                ),
                true,
            ),
        ]));
        let mut ids = Vec::with_capacity(rows.len());
        let mut captions = Vec::with_capacity(rows.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(rows.len());
        for (record, vector) in rows {
            ids.push(record.id.clone());
            captions.push(record.caption.clone());
            vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
        }
        let record_batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(captions)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(vectors.into_iter(), dim as i32)),
            ],
        )?;
        Ok(record_batch)
    }
}
