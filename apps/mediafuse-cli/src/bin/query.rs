use std::env;
use std::sync::Arc;

use mediafuse_core::config::{expand_path, Config};
use mediafuse_core::types::QuerySpec;
use mediafuse_embed::global_provider;
use mediafuse_engine::FusionEngine;
use mediafuse_text::{TantivyTextBackend, TextField};
use mediafuse_vector::LanceVectorBackend;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} [--visual TEXT] [--ocr TEXT] [--asr TEXT] [--example ID] [--limit N]",
            args[0]
        );
        eprintln!(
            "Example: {} --visual 'a dog on a beach' --ocr 'exit' --limit 20",
            args[0]
        );
        eprintln!("Example: {} --example v1_s42 --limit 10", args[0]);
        std::process::exit(1);
    }

    let mut visual: Option<String> = None;
    let mut ocr: Option<String> = None;
    let mut asr: Option<String> = None;
    let mut example: Option<String> = None;
    let mut limit: Option<usize> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--visual" => {
                visual = Some(take_value(&args, &mut i, "--visual"));
            }
            "--ocr" => {
                ocr = Some(take_value(&args, &mut i, "--ocr"));
            }
            "--asr" => {
                asr = Some(take_value(&args, &mut i, "--asr"));
            }
            "--example" => {
                example = Some(take_value(&args, &mut i, "--example"));
            }
            "--limit" => {
                let raw = take_value(&args, &mut i, "--limit");
                match raw.parse::<usize>() {
                    Ok(n) => limit = Some(n),
                    Err(_) => {
                        eprintln!("Error: --limit requires a number");
                        std::process::exit(1);
                    }
                }
            }
            other => {
                eprintln!("Error: unknown argument '{}'", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = Config::load()?;
    let tantivy_dir: String = config
        .get("data.tantivy_index_dir")
        .unwrap_or_else(|_| "../dev_data/indexes/tantivy".to_string());
    let lancedb_dir: String = config
        .get("data.lancedb_dir")
        .unwrap_or_else(|_| "../dev_data/indexes/lancedb".to_string());
    let table: String = config
        .get("data.vector_table")
        .unwrap_or_else(|_| "segments".to_string());

    let tantivy_dir = expand_path(&tantivy_dir);
    let engine = FusionEngine::new(
        global_provider()?,
        Arc::new(LanceVectorBackend::open(&expand_path(&lancedb_dir), &table)?),
        Arc::new(TantivyTextBackend::open(&tantivy_dir, TextField::Ocr)?),
        Arc::new(TantivyTextBackend::open(&tantivy_dir, TextField::Asr)?),
        config.engine_settings(),
    );

    let results = if let Some(example) = example {
        println!("mediafuse query\n===============");
        println!("Example segment: {}", example);
        engine.more_like(&example, limit)?
    } else {
        let spec = QuerySpec::from_fields(visual.as_deref(), ocr.as_deref(), asr.as_deref(), limit)?;
        println!("mediafuse query\n===============");
        if let Some(v) = &spec.visual {
            println!("Visual terms: {:?} (merge: {:?})", v.terms, v.merge_mode);
        }
        if let Some(o) = &spec.ocr {
            println!("OCR query: {}", o);
        }
        if let Some(a) = &spec.asr {
            println!("ASR query: {}", a);
        }
        engine.fuse(&spec)?
    };

    println!("\nFound {} segments", results.len());
    for (rank, segment) in results.iter().enumerate() {
        println!("  {}. score={:.4}  id={}", rank + 1, segment.score, segment.id);
    }
    Ok(())
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> String {
    if *i + 1 >= args.len() {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    }
    *i += 1;
    args[*i].clone()
}
