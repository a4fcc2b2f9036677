//! POI extraction: fetch tagged features and attribute them to boundary regions.

use std::path::Path;

use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::crs::{reproject, Crs};
use crate::error::Result;
use crate::io::read_table_with_crs;
use crate::models::{FeatureTable, TagFilter};
use crate::osm::{FeatureSource, ELEMENT_TYPE, OSMID};
use crate::spatial::{spatial_join, Predicate};

/// Display name column, also the default merge key
pub const NAME: &str = "name";
/// Synthetic stable identifier, `{element_type}/{osmid}`
pub const POI_ID: &str = "poi_id";

/// Which attribute columns are dropped after point filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPrune {
    /// Drop columns that are null on every point
    #[default]
    Empty,
    /// Drop columns that are null on any point
    Sparse,
}

/// Turns raw source features into a POI-region table
#[derive(Debug, Clone)]
pub struct PoiExtractor {
    pub crs: Crs,
    pub place: String,
    pub tags: TagFilter,
    pub column_prune: ColumnPrune,
    /// CRS of boundary files that do not declare one
    pub boundaries_crs: Option<Crs>,
}

impl PoiExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            crs: config.crs,
            place: config.place.clone(),
            tags: config.tags.clone(),
            column_prune: config.column_prune,
            boundaries_crs: config.boundaries_crs,
        }
    }

    /// Load the boundary file and run the extraction
    pub async fn run<S: FeatureSource>(
        &self,
        source: &S,
        boundary_source: &Path,
    ) -> Result<FeatureTable> {
        let boundaries = read_table_with_crs(boundary_source, self.boundaries_crs)?;
        self.run_with_boundaries(source, &boundaries).await
    }

    pub async fn run_with_boundaries<S: FeatureSource>(
        &self,
        source: &S,
        boundaries: &FeatureTable,
    ) -> Result<FeatureTable> {
        let boundaries = reproject(boundaries, self.crs);
        let non_polygons = boundaries
            .iter()
            .filter(|f| !matches!(f.geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_)))
            .count();
        if non_polygons > 0 {
            warn!("{} boundary features are not polygons", non_polygons);
        }

        info!("Querying features for '{}'", self.place);
        let raw = source.query(&self.place, &self.tags).await?;

        let pois = self.prepare_points(raw);
        let pois = reproject(&pois, self.crs);

        let poi_regions = spatial_join(&pois, &boundaries, Predicate::Intersects)?;
        info!(
            "{} of {} POIs fall inside {} boundary regions ({} rows)",
            count_distinct_ids(&poi_regions),
            pois.len(),
            boundaries.len(),
            poi_regions.len()
        );

        Ok(poi_regions)
    }

    /// Keep point features, prune empty attribute columns and attach `name` and `poi_id`
    fn prepare_points(&self, raw: FeatureTable) -> FeatureTable {
        let total = raw.len();
        let mut points = FeatureTable::with_features(
            raw.crs,
            raw.features.into_iter().filter(|f| f.is_point()).collect(),
        );
        info!("Kept {} point features of {}", points.len(), total);

        let names: Vec<Value> = points
            .iter()
            .map(|f| f.get(NAME).cloned().unwrap_or(Value::Null))
            .collect();

        let keep = [ELEMENT_TYPE, OSMID];
        let dropped = match self.column_prune {
            ColumnPrune::Empty => points.drop_empty_columns(&keep),
            ColumnPrune::Sparse => points.drop_sparse_columns(&keep),
        };
        if !dropped.is_empty() {
            debug!("Dropped {} attribute columns: {:?}", dropped.len(), dropped);
        }

        for (row, (feature, name)) in points.features.iter_mut().zip(names).enumerate() {
            let poi_id = match (feature.key(ELEMENT_TYPE), feature.key(OSMID)) {
                (Some(element_type), Some(id)) => format!("{}/{}", element_type, id),
                _ => format!("row/{}", row),
            };
            feature.set(NAME, name);
            feature.set(POI_ID, poi_id);
        }

        points
    }
}

fn count_distinct_ids(table: &FeatureTable) -> usize {
    table
        .iter()
        .filter_map(|f| f.key(POI_ID))
        .collect::<hashbrown::HashSet<_>>()
        .len()
}

/// Extract POIs for `place_name` matching `tag_filter` and join them with the
/// boundary polygons in `boundary_source`, all in `target_crs`
pub async fn extract<S: FeatureSource>(
    source: &S,
    boundary_source: &Path,
    tag_filter: &TagFilter,
    target_crs: Crs,
    place_name: &str,
) -> Result<FeatureTable> {
    let extractor = PoiExtractor {
        crs: target_crs,
        place: place_name.to_string(),
        tags: tag_filter.clone(),
        column_prune: ColumnPrune::default(),
        boundaries_crs: None,
    };
    extractor.run(source, boundary_source).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, Properties};
    use crate::osm::{osm_properties, StaticSource};
    use crate::spatial::INDEX_RIGHT;
    use geo::{line_string, point, polygon};
    use serde_json::json;

    fn region(x0: f64, plr: &str) -> Feature {
        let mut props = Properties::new();
        props.insert("PLR_ID".into(), json!(plr));
        Feature::new(
            polygon![(x: x0, y: 0.0), (x: x0 + 10.0, y: 0.0), (x: x0 + 10.0, y: 10.0), (x: x0, y: 10.0)],
            props,
        )
    }

    fn poi(id: i64, x: f64, y: f64, tags: &[(&str, &str)]) -> Feature {
        Feature::new(point!(x: x, y: y), osm_properties("node", id, tags.iter().copied()))
    }

    fn extractor() -> PoiExtractor {
        PoiExtractor {
            crs: Crs::Wgs84,
            place: "Testville".into(),
            tags: TagFilter::gastronomy(),
            column_prune: ColumnPrune::Empty,
            boundaries_crs: None,
        }
    }

    fn source() -> StaticSource {
        StaticSource::new(FeatureTable::with_features(
            Crs::Wgs84,
            vec![
                poi(1, 5.0, 5.0, &[("amenity", "cafe"), ("name", "Cafe X")]),
                poi(2, 50.0, 5.0, &[("amenity", "bar"), ("name", "Far Bar")]),
                poi(3, 10.0, 5.0, &[("amenity", "pub")]),
                poi(4, 6.0, 6.0, &[("shop", "bakery"), ("name", "Not gastronomy")]),
                Feature::new(
                    line_string![(x: 1.0, y: 1.0), (x: 2.0, y: 2.0)],
                    osm_properties("way", 9, [("amenity", "restaurant"), ("opening_hours", "24/7")]),
                ),
            ],
        ))
    }

    fn boundaries() -> FeatureTable {
        FeatureTable::with_features(Crs::Wgs84, vec![region(0.0, "west"), region(10.0, "east")])
    }

    #[tokio::test]
    async fn test_boundary_join() {
        let table = extractor()
            .run_with_boundaries(&source(), &boundaries())
            .await
            .unwrap();

        // Cafe X once, the unnamed pub on the shared edge twice, Far Bar dropped
        assert_eq!(table.len(), 3);
        let ids: Vec<_> = table.iter().map(|f| f.key(POI_ID).unwrap()).collect();
        assert_eq!(ids, vec!["node/1", "node/3", "node/3"]);

        assert_eq!(table.features[0].key("PLR_ID").as_deref(), Some("west"));
        assert_eq!(table.features[1].key("PLR_ID").as_deref(), Some("west"));
        assert_eq!(table.features[2].key("PLR_ID").as_deref(), Some("east"));
        assert!(table.iter().all(|f| f.get(INDEX_RIGHT).is_some()));
    }

    #[tokio::test]
    async fn test_points_only_and_null_names() {
        let table = extractor()
            .run_with_boundaries(&source(), &boundaries())
            .await
            .unwrap();

        // The way (and with it its only non-null opening_hours) is gone
        assert!(table.iter().all(|f| f.is_point()));
        assert!(!table.contains_column("opening_hours"));

        let unnamed = &table.features[1];
        assert!(unnamed.properties.contains_key(NAME));
        assert!(unnamed.is_null(NAME));
    }

    #[tokio::test]
    async fn test_sparse_pruning_keeps_name() {
        let mut extractor = extractor();
        extractor.column_prune = ColumnPrune::Sparse;

        let table = extractor
            .run_with_boundaries(&source(), &boundaries())
            .await
            .unwrap();

        let first = &table.features[0];
        assert_eq!(first.key(NAME).as_deref(), Some("Cafe X"));
        assert!(first.get("amenity").is_some());
        assert!(first.get(ELEMENT_TYPE).is_some());
    }

    #[tokio::test]
    async fn test_reprojects_into_target() {
        let mut extractor = extractor();
        extractor.crs = Crs::from_epsg(3857).unwrap();

        let table = extractor
            .run_with_boundaries(&source(), &boundaries())
            .await
            .unwrap();
        assert_eq!(table.crs, Crs::WebMercator);
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_boundaries_fail_fast() {
        let result = extract(
            &source(),
            Path::new("/nonexistent/lor.geojson"),
            &TagFilter::gastronomy(),
            Crs::Wgs84,
            "Testville",
        )
        .await;
        assert!(matches!(result, Err(crate::error::Error::DataLoad(_))));
    }
}
