//! Spatial operations on feature tables: R-tree join and point buffering.

mod buffer;
mod index;
mod join;

pub use buffer::{buffer_point, buffer_table, DEFAULT_QUAD_SEGS};
pub use index::FeatureIndex;
pub use join::{spatial_join, Predicate, INDEX_RIGHT, LEFT_SUFFIX, RIGHT_SUFFIX};
