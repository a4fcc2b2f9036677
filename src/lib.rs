//! Parkspot - POI extraction and parking capacity estimation
//!
//! This library provides the pipeline stages, spatial operations, and
//! OpenStreetMap feature sources used by the enrich binary.

pub mod config;
pub mod crs;
pub mod error;
pub mod io;
pub mod models;
pub mod osm;
pub mod pipeline;
pub mod spatial;

pub use config::PipelineConfig;
pub use crs::Crs;
pub use error::{DataLoadError, Error, InvalidAttributeError, Result};
pub use models::{Feature, FeatureTable, TagFilter};
pub use pipeline::{extract, Aggregation, Estimate, ParkingEstimator, PoiExtractor};
