use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context};
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use tracing::debug;

use mediafuse_core::error::{Error, Result};
use mediafuse_core::traits::{VectorBackend, VectorQuery};
use mediafuse_core::types::{RawHit, SegmentId};

/// ANN lookups over one LanceDB table. The adapter owns its runtime and
/// presents a blocking surface to the engine.
pub struct LanceVectorBackend {
    db: Connection,
    table_name: String,
    runtime: tokio::runtime::Runtime,
}

impl LanceVectorBackend {
    pub fn open(db_path: &Path, table_name: &str) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let db = runtime
            .block_on(connect(db_path.to_string_lossy().as_ref()).execute())
            .context("connecting to LanceDB")?;
        Ok(Self {
            db,
            table_name: table_name.to_string(),
            runtime,
        })
    }

    async fn run_query(&self, query: &VectorQuery) -> anyhow::Result<Vec<RawHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut q = table
            .vector_search(query.vector.clone())?
            .distance_type(DistanceType::Cosine);
        if let Some(ids) = &query.restrict_to {
            q = q.only_if(id_membership_filter(ids));
        }
        if let Some(n) = query.count_hint {
            q = q.limit(n);
        }
        if let Some(quality) = query.index_quality {
            // Runtime index-quality knob: widen the probe count so the
            // index surfaces at least this many true-ish neighbors.
            q = q.nprobes(quality);
        }
        let mut stream = q.execute().await?;
        let mut hits = Vec::new();
        while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
            for i in 0..batch.num_rows() {
                hits.push(RawHit {
                    id: string_value(&batch, "id", i)?,
                    distance: float_value(&batch, "_distance", i)?,
                });
            }
        }
        Ok(hits)
    }

    async fn fetch_vector(&self, id: &SegmentId) -> anyhow::Result<Vec<f32>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut stream = table
            .query()
            .only_if(format!("id = '{}'", escape(id)))
            .limit(1)
            .execute()
            .await?;
        while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
            if batch.num_rows() > 0 {
                return vector_value(&batch, "vector", 0);
            }
        }
        Err(anyhow!("example segment not found: {id}"))
    }
}

impl VectorBackend for LanceVectorBackend {
    fn search(&self, query: &VectorQuery) -> Result<Vec<RawHit>> {
        // An empty candidate set is a valid query with an empty answer;
        // it never reaches the store.
        if query.restrict_to.as_ref().is_some_and(BTreeSet::is_empty) {
            return Ok(Vec::new());
        }
        let hits = self
            .runtime
            .block_on(self.run_query(query))
            .map_err(|e| Error::Backend(e.to_string()))?;
        debug!(hits = hits.len(), restricted = query.restrict_to.is_some(), "vector lookup");
        Ok(hits)
    }

    fn search_by_id(
        &self,
        example: &SegmentId,
        count_hint: Option<usize>,
        index_quality: Option<usize>,
    ) -> Result<Vec<RawHit>> {
        self.runtime
            .block_on(async {
                let vector = self.fetch_vector(example).await?;
                let table = self.db.open_table(&self.table_name).execute().await?;
                let mut q = table
                    .vector_search(vector)?
                    .distance_type(DistanceType::Cosine)
                    .only_if(format!("id != '{}'", escape(example)));
                if let Some(n) = count_hint {
                    q = q.limit(n);
                }
                if let Some(quality) = index_quality {
                    q = q.nprobes(quality);
                }
                let mut stream = q.execute().await?;
                let mut hits = Vec::new();
                while let Some(batch) = TryStreamExt::try_next(&mut stream).await? {
                    for i in 0..batch.num_rows() {
                        hits.push(RawHit {
                            id: string_value(&batch, "id", i)?,
                            distance: float_value(&batch, "_distance", i)?,
                        });
                    }
                }
                Ok(hits)
            })
            .map_err(|e: anyhow::Error| Error::Backend(e.to_string()))
    }
}

/// Structured id set to a membership predicate; quoting stays inside the
/// adapter, callers never build filter text.
fn id_membership_filter(ids: &BTreeSet<SegmentId>) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", escape(id))).collect();
    format!("id IN ({})", quoted.join(", "))
}

fn escape(id: &str) -> String {
    id.replace('\'', "''")
}

fn string_value(batch: &RecordBatch, column: &str, row: usize) -> anyhow::Result<String> {
    let col = batch
        .column_by_name(column)
        .ok_or_else(|| anyhow!("missing column: {column}"))?;
    let values = col
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("column {column} is not a string array"))?;
    Ok(values.value(row).to_string())
}

fn float_value(batch: &RecordBatch, column: &str, row: usize) -> anyhow::Result<f32> {
    let col = batch
        .column_by_name(column)
        .ok_or_else(|| anyhow!("missing column: {column}"))?;
    let values = col
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow!("column {column} is not a float array"))?;
    Ok(values.value(row))
}

fn vector_value(batch: &RecordBatch, column: &str, row: usize) -> anyhow::Result<Vec<f32>> {
    let col = batch
        .column_by_name(column)
        .ok_or_else(|| anyhow!("missing column: {column}"))?;
    let list = col
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| anyhow!("column {column} is not a fixed-size list"))?;
    let values = list.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow!("column {column} items are not floats"))?;
    Ok(floats.values().to_vec())
}
