//! Search operations that work alongside the index.

pub mod exact_knn;

pub use exact_knn::{exact_knn, ExactKnn};
