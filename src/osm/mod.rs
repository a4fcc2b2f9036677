//! OpenStreetMap feature sources.
//!
//! The extractor only depends on the [`FeatureSource`] trait; the Overpass
//! source queries the public API, the PBF source reads a local extract.

mod geometry;
mod overpass;
mod pbf;
mod source;

pub use geometry::{merge_rings_to_polygons, GeometryResolver};
pub use overpass::{build_query, OverpassSource, DEFAULT_NOMINATIM_URL, DEFAULT_OVERPASS_URL};
pub use pbf::{place_key, PbfSource};
pub use source::{osm_properties, FeatureSource, StaticSource, ELEMENT_TYPE, OSMID};
