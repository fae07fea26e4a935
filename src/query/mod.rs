//! Query descriptors and range algebra

pub mod descriptor;
pub mod range;

pub use descriptor::{CategoryFilter, ModelQuery};
pub use range::QueryRange;
