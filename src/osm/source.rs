use std::future::Future;

use serde_json::Value;

use crate::crs::Crs;
use crate::error::Result;
use crate::models::{FeatureTable, Properties, TagFilter};

/// Column holding the OSM element type (`node`, `way`, `relation`)
pub const ELEMENT_TYPE: &str = "element_type";
/// Column holding the OSM element id
pub const OSMID: &str = "osmid";

/// A queryable source of OSM features.
///
/// Implementations return features in EPSG:4326 with the `element_type` and
/// `osmid` columns plus one column per OSM tag.
pub trait FeatureSource {
    fn query(
        &self,
        place: &str,
        tags: &TagFilter,
    ) -> impl Future<Output = Result<FeatureTable>> + Send;
}

/// Build the property map of an OSM element
pub fn osm_properties<'a, I>(element_type: &str, id: i64, tags: I) -> Properties
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut properties = Properties::new();
    properties.insert(ELEMENT_TYPE.to_string(), Value::from(element_type));
    properties.insert(OSMID.to_string(), Value::from(id));
    for (key, value) in tags {
        properties.insert(key.to_string(), Value::from(value));
    }
    properties
}

/// Serves a pre-fetched table, applying the tag filter to its columns
#[derive(Debug, Clone)]
pub struct StaticSource {
    table: FeatureTable,
}

impl StaticSource {
    pub fn new(table: FeatureTable) -> Self {
        Self { table }
    }
}

impl FeatureSource for StaticSource {
    async fn query(&self, _place: &str, tags: &TagFilter) -> Result<FeatureTable> {
        let features = self
            .table
            .iter()
            .filter(|f| tags.matches(|k| f.get(k).and_then(Value::as_str)))
            .cloned()
            .collect();

        let table = FeatureTable::with_features(self.table.crs, features);
        Ok(crate::crs::reproject(&table, Crs::Wgs84))
    }
}
