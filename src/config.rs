//! Pipeline configuration with documented defaults.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! crs = "EPSG:25833"
//! place = "Berlin, Germany"
//! buffer_radius = 20.0
//! aggregation = "capacity-sum"
//!
//! [tags]
//! amenity = ["restaurant", "cafe"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::crs::{Crs, Datum};
use crate::error::{Error, Result};
use crate::models::TagFilter;
use crate::osm::{DEFAULT_NOMINATIM_URL, DEFAULT_OVERPASS_URL};
use crate::pipeline::{Aggregation, ColumnPrune, MergeKey};
use crate::spatial::DEFAULT_QUAD_SEGS;

pub const DEFAULT_CRS: &str = "EPSG:25833";
pub const DEFAULT_PLACE: &str = "Berlin, Germany";
pub const DEFAULT_BUFFER_RADIUS: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub overpass_url: String,
    pub nominatim_url: String,
    /// Overpass server-side timeout
    pub timeout_secs: u64,
    /// Read features from this PBF extract instead of Overpass
    pub pbf: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            timeout_secs: 180,
            pbf: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Working CRS; buffer radius is expressed in its units
    pub crs: Crs,
    /// Place queried from the feature source
    pub place: String,
    /// Boundary (LOR) polygon file
    pub boundaries: Option<PathBuf>,
    /// Parking spot file
    pub parking: Option<PathBuf>,
    /// CRS of a boundary file that does not declare one (x/y CSV, GeoJSON without `crs`)
    pub boundaries_crs: Option<Crs>,
    /// CRS of a parking file that does not declare one
    pub parking_crs: Option<Crs>,
    pub tags: TagFilter,
    pub buffer_radius: f64,
    /// Buffer polygon resolution (segments per quarter circle)
    pub quad_segs: u32,
    pub aggregation: Aggregation,
    pub merge_key: MergeKey,
    pub column_prune: ColumnPrune,
    pub source: SourceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crs: Crs::Utm {
                zone: 33,
                north: true,
                datum: Datum::Etrs89,
            },
            place: DEFAULT_PLACE.to_string(),
            boundaries: None,
            parking: None,
            boundaries_crs: None,
            parking_crs: None,
            tags: TagFilter::gastronomy(),
            buffer_radius: DEFAULT_BUFFER_RADIUS,
            quad_segs: DEFAULT_QUAD_SEGS,
            aggregation: Aggregation::default(),
            merge_key: MergeKey::default(),
            column_prune: ColumnPrune::default(),
            source: SourceConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: PipelineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.buffer_radius.is_finite() || self.buffer_radius < 0.0 {
            return Err(Error::Config(format!(
                "buffer_radius must be a non-negative number, got {}",
                self.buffer_radius
            )));
        }
        if self.quad_segs == 0 {
            return Err(Error::Config("quad_segs must be at least 1".to_string()));
        }
        if self.tags.is_empty() {
            return Err(Error::Config("at least one tag filter is required".to_string()));
        }
        if self.crs.is_geographic() {
            tracing::warn!(
                "Working CRS {} is geographic; buffer radius is interpreted in degrees",
                self.crs
            );
        }
        Ok(())
    }

    pub fn boundaries_path(&self) -> Result<&Path> {
        self.boundaries
            .as_deref()
            .ok_or_else(|| Error::Config("no boundary file configured".to_string()))
    }

    pub fn parking_path(&self) -> Result<&Path> {
        self.parking
            .as_deref()
            .ok_or_else(|| Error::Config("no parking file configured".to_string()))
    }
}
