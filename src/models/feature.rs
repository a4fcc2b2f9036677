//! Geometry tables: an ordered list of features sharing one CRS.

use geo::Geometry;
use hashbrown::HashSet;
use serde_json::{Map, Value};

use crate::crs::Crs;

/// Attribute columns of a single feature
pub type Properties = Map<String, Value>;

/// Human readable name of a geometry variant (matches GeoJSON type names)
pub fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// A geometry with its attribute columns.
///
/// A missing key and an explicit JSON `null` are both treated as null.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>, properties: Properties) -> Self {
        Self {
            geometry: geometry.into(),
            properties,
        }
    }

    /// Get a non-null attribute value
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.properties.get(column).filter(|v| !v.is_null())
    }

    /// Get an attribute as a string key (strings verbatim, other values as JSON)
    pub fn key(&self, column: &str) -> Option<String> {
        self.get(column).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(column.into(), value.into());
    }

    pub fn is_null(&self, column: &str) -> bool {
        self.get(column).is_none()
    }

    pub fn is_point(&self) -> bool {
        matches!(self.geometry, Geometry::Point(_))
    }

    pub fn kind(&self) -> &'static str {
        geometry_kind(&self.geometry)
    }
}

/// Ordered collection of features in one coordinate reference system
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub crs: Crs,
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            features: Vec::new(),
        }
    }

    pub fn with_features(crs: Crs, features: Vec<Feature>) -> Self {
        Self { crs, features }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// All column names, in order of first appearance
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for feature in &self.features {
            for key in feature.properties.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    /// True if any feature has the column, even if every value is null
    pub fn contains_column(&self, column: &str) -> bool {
        self.features
            .iter()
            .any(|f| f.properties.contains_key(column))
    }

    pub fn drop_column(&mut self, column: &str) {
        for feature in &mut self.features {
            feature.properties.remove(column);
        }
    }

    /// Drop columns that are null on every row, except those in `keep`
    pub fn drop_empty_columns(&mut self, keep: &[&str]) -> Vec<String> {
        self.drop_columns_where(keep, |table, column| {
            table.features.iter().all(|f| f.is_null(column))
        })
    }

    /// Drop columns that are null on at least one row, except those in `keep`
    pub fn drop_sparse_columns(&mut self, keep: &[&str]) -> Vec<String> {
        self.drop_columns_where(keep, |table, column| {
            table.features.iter().any(|f| f.is_null(column))
        })
    }

    fn drop_columns_where<F>(&mut self, keep: &[&str], predicate: F) -> Vec<String>
    where
        F: Fn(&FeatureTable, &str) -> bool,
    {
        let dropped: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| !keep.contains(&c.as_str()))
            .filter(|c| predicate(self, c))
            .collect();

        for column in &dropped {
            self.drop_column(column);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn table() -> FeatureTable {
        FeatureTable::with_features(
            Crs::Wgs84,
            vec![
                Feature::new(
                    point!(x: 0.0, y: 0.0),
                    props(json!({"name": "A", "cuisine": "thai", "wheelchair": null})),
                ),
                Feature::new(
                    point!(x: 1.0, y: 1.0),
                    props(json!({"name": null, "wheelchair": null})),
                ),
            ],
        )
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        let columns = table().columns();
        assert_eq!(columns.len(), 3);
        assert!(columns.contains(&"cuisine".to_string()));
    }

    #[test]
    fn test_drop_empty_columns() {
        let mut t = table();
        let dropped = t.drop_empty_columns(&[]);
        assert_eq!(dropped, vec!["wheelchair".to_string()]);
        assert!(t.contains_column("cuisine"));
        assert!(t.contains_column("name"));
    }

    #[test]
    fn test_drop_sparse_columns_keeps_listed() {
        let mut t = table();
        t.drop_sparse_columns(&["name"]);
        assert!(t.contains_column("name"));
        assert!(!t.contains_column("cuisine"));
        assert!(!t.contains_column("wheelchair"));
    }

    #[test]
    fn test_key_renders_non_strings() {
        let f = Feature::new(point!(x: 0.0, y: 0.0), props(json!({"id": 7, "n": "x"})));
        assert_eq!(f.key("id").as_deref(), Some("7"));
        assert_eq!(f.key("n").as_deref(), Some("x"));
        assert_eq!(f.key("missing"), None);
    }
}
