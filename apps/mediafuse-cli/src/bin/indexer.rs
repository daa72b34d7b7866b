use std::io::BufRead;
use std::{env, fs, io, path::PathBuf};

use mediafuse_core::config::{expand_path, Config};
use mediafuse_core::types::SegmentRecord;
use mediafuse_embed::global_provider;
use mediafuse_text::SegmentTextWriter;
use mediafuse_vector::LanceSegmentWriter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;

    let args: Vec<String> = env::args().skip(1).collect();
    let segments_file = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let p: String = config
                .get("data.segments_file")
                .unwrap_or_else(|_| "../dev_data/segments.jsonl".to_string());
            expand_path(p)
        });

    println!("mediafuse indexer\n=================");
    println!("Segments file: {}", segments_file.display());

    let file = fs::File::open(&segments_file)?;
    let mut records = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SegmentRecord = serde_json::from_str(&line)?;
        records.push(record);
    }
    println!("Parsed {} segment records", records.len());

    let tantivy_dir: String = config
        .get("data.tantivy_index_dir")
        .unwrap_or_else(|_| "../dev_data/indexes/tantivy".to_string());
    let text_writer = SegmentTextWriter::create(&expand_path(&tantivy_dir))?;
    let count = text_writer.add_segments(&records)?;
    println!("Indexed {} segments into Tantivy at {}", count, tantivy_dir);

    let lancedb_dir: String = config
        .get("data.lancedb_dir")
        .unwrap_or_else(|_| "../dev_data/indexes/lancedb".to_string());
    let table: String = config
        .get("data.vector_table")
        .unwrap_or_else(|_| "segments".to_string());
    let provider = global_provider()?;
    let vector_writer = LanceSegmentWriter::open(&expand_path(&lancedb_dir), &table, provider)?;
    vector_writer.index_segments(&records)?;
    println!("Indexed {} segments into LanceDB table '{}'", records.len(), table);

    println!("\nIndexing completed successfully");
    println!("To query: cargo run --bin mediafuse-query -- --visual \"<description>\"");
    Ok(())
}
