#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Tantivy-backed full-text adapter for the OCR and ASR fields.
//!
//! One index holds both fields; a `TantivyTextBackend` instance is bound
//! to exactly one of them at construction, so the engine can hold OCR
//! and ASR as separate, independently swappable collaborators.

pub mod index;
pub mod search;

pub use index::SegmentTextWriter;
pub use search::{TantivyTextBackend, TextField};
