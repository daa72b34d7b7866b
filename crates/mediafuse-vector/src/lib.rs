#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! LanceDB-backed ANN adapter: one table of `(id, caption, vector)`
//! rows, cosine distance on L2-normalized vectors.

pub mod backend;
pub mod writer;

pub use backend::LanceVectorBackend;
pub use writer::LanceSegmentWriter;
