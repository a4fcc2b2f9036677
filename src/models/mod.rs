//! Core data models for the enrichment pipeline.

pub mod feature;
pub mod tags;

pub use feature::{geometry_kind, Feature, FeatureTable, Properties};
pub use tags::{TagFilter, TagValues};
