//! Offline feature source over a local `.osm.pbf` extract.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use geo::{Geometry, Intersects, MultiPolygon, Point};
use indicatif::{ProgressBar, ProgressStyle};
use osmpbfreader::{OsmObj, OsmPbfReader, Tags};
use tracing::{debug, info};

use super::geometry::GeometryResolver;
use super::source::{osm_properties, FeatureSource};
use crate::crs::Crs;
use crate::error::{DataLoadError, Error, Result};
use crate::models::{Feature, FeatureTable, TagFilter};

/// The first comma separated component of a place query ("Berlin, Germany" → "Berlin")
pub fn place_key(place: &str) -> &str {
    place.split(',').next().unwrap_or(place).trim()
}

fn is_place_boundary(tags: &Tags, place: &str) -> bool {
    let is_boundary = tags
        .get("boundary")
        .map(|v| v == "administrative")
        .unwrap_or(false);
    is_boundary && tags.get("name").map(|v| v == place).unwrap_or(false)
}

fn tag_pairs(tags: &Tags) -> impl Iterator<Item = (&str, &str)> {
    tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

fn matches_filter(filter: &TagFilter, tags: &Tags) -> bool {
    filter.matches(|k| tags.get(k).map(|v| v.as_str()))
}

/// Reads features from a PBF file, bounded by the administrative boundary
/// whose `name` matches the place query.
///
/// The scan makes several passes over the file and runs on tokio's blocking
/// thread pool.
#[derive(Debug, Clone)]
pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<OsmPbfReader<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|e| DataLoadError::new(&self.path, e))?;
        Ok(OsmPbfReader::new(BufReader::new(file)))
    }

    fn scan(&self, place: &str, filter: &TagFilter) -> Result<FeatureTable> {
        let place = place_key(place);
        let mut reader = self.open()?;

        let resolver = GeometryResolver::build(
            &mut reader,
            |tags| is_place_boundary(tags, place),
            |tags| matches_filter(filter, tags),
        )?;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} objects ({per_sec})")
                .map_err(|e| Error::Source(e.to_string()))?,
        );

        let mut area: Option<MultiPolygon<f64>> = None;
        let mut candidates = Vec::new();

        reader.rewind().map_err(|e| Error::Source(e.to_string()))?;
        for obj in reader.iter() {
            pb.inc(1);
            let obj = obj.map_err(|e| Error::Source(e.to_string()))?;

            match &obj {
                OsmObj::Node(node) if matches_filter(filter, &node.tags) => {
                    let point = Point::new(node.lon(), node.lat());
                    let properties = osm_properties("node", node.id.0, tag_pairs(&node.tags));
                    candidates.push(Feature::new(point, properties));
                }
                OsmObj::Way(way) if matches_filter(filter, &way.tags) => {
                    match resolver.resolve_way(way.id) {
                        Some(geometry) => {
                            let properties = osm_properties("way", way.id.0, tag_pairs(&way.tags));
                            candidates.push(Feature::new(geometry, properties));
                        }
                        None => debug!("Could not resolve geometry for way {}", way.id.0),
                    }
                }
                OsmObj::Relation(rel) if area.is_none() && is_place_boundary(&rel.tags, place) => {
                    area = resolver.resolve_relation(rel.id);
                    if area.is_some() {
                        info!("Using boundary relation {} for '{}'", rel.id.0, place);
                    }
                }
                _ => {}
            }
        }
        pb.finish_and_clear();

        let area = area.ok_or_else(|| {
            Error::Source(format!(
                "No administrative boundary named '{}' in {}",
                place,
                self.path.display()
            ))
        })?;

        let area: Geometry<f64> = area.into();
        let features: Vec<Feature> = candidates
            .into_iter()
            .filter(|f| f.geometry.intersects(&area))
            .collect();

        Ok(FeatureTable::with_features(Crs::Wgs84, features))
    }
}

impl FeatureSource for PbfSource {
    async fn query(&self, place: &str, tags: &TagFilter) -> Result<FeatureTable> {
        info!("Reading features for '{}' from {}", place, self.path.display());
        let source = self.clone();
        let place = place.to_string();
        let tags = tags.clone();
        let table = tokio::task::spawn_blocking(move || source.scan(&place, &tags))
            .await
            .map_err(|e| Error::Source(format!("PBF scan task failed: {}", e)))??;
        info!("Found {} matching features", table.len());
        Ok(table)
    }
}
