#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Rank-fusion query engine for multi-modal segment retrieval.
//!
//! A request may carry a visual-similarity description, OCR text, ASR
//! text, or any combination. The dispatcher picks exactly one fusion
//! strategy from the fields present; the fusion module issues the
//! backend round-trips and combines their result sets into a single
//! ranking; the normalizer deduplicates, scores and orders the output.

pub mod dispatch;
pub mod fusion;
pub mod normalize;

pub use dispatch::Strategy;
pub use fusion::FusionEngine;
