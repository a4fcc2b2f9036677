//! Parking estimation: count or sum parking capacity within a radius of each POI.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::extractor::{NAME, POI_ID};
use crate::config::PipelineConfig;
use crate::crs::{reproject, Crs};
use crate::error::{Error, InvalidAttributeError, Result};
use crate::io::read_table_with_crs;
use crate::models::FeatureTable;
use crate::spatial::{
    buffer_table, spatial_join, Predicate, DEFAULT_QUAD_SEGS, INDEX_RIGHT, LEFT_SUFFIX,
    RIGHT_SUFFIX,
};

/// Output column on the enriched table
pub const PARKING_SPOTS: &str = "No. parking spots";
/// Parking capacity attribute
pub const CAPACITY: &str = "capacity";

/// How parking spots within a POI's buffer are aggregated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Number of intersecting parking features
    #[default]
    #[serde(rename = "count", alias = "len")]
    Count,
    /// Sum of their `capacity` values
    #[serde(rename = "capacity-sum", alias = "sum", alias = "capacity_sum")]
    CapacitySum,
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" | "len" => Ok(Aggregation::Count),
            "capacity-sum" | "capacity_sum" | "sum" => Ok(Aggregation::CapacitySum),
            other => Err(Error::Config(format!(
                "unknown aggregation '{}', expected 'count' or 'capacity-sum'",
                other
            ))),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Count => write!(f, "count"),
            Aggregation::CapacitySum => write!(f, "capacity-sum"),
        }
    }
}

/// Column the aggregate is grouped by and merged back on.
///
/// `Name` groups every POI sharing a display name together, so all of them
/// receive the same aggregate. `PoiId` keeps POIs apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeKey {
    #[default]
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "poi_id", alias = "poi-id")]
    PoiId,
}

impl MergeKey {
    pub fn column(&self) -> &'static str {
        match self {
            MergeKey::Name => NAME,
            MergeKey::PoiId => POI_ID,
        }
    }
}

impl FromStr for MergeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(MergeKey::Name),
            "poi_id" | "poi-id" => Ok(MergeKey::PoiId),
            other => Err(Error::Config(format!(
                "unknown merge key '{}', expected 'name' or 'poi_id'",
                other
            ))),
        }
    }
}

/// Interpret a capacity value as a non-negative integer.
///
/// Integers pass through, floats are truncated toward zero, strings are
/// parsed after trimming and booleans count as 1 or 0.
pub fn coerce_capacity(row: usize, value: Option<&Value>) -> Result<i64, InvalidAttributeError> {
    let invalid = || InvalidAttributeError {
        row,
        column: CAPACITY.to_string(),
        value: value.map(Value::to_string).unwrap_or_else(|| "null".to_string()),
    };

    let from_float = |f: f64| {
        if f.is_finite() && f.abs() < i64::MAX as f64 {
            Some(f.trunc() as i64)
        } else {
            None
        }
    };

    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(from_float)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        _ => None,
    };
    parsed.filter(|c| *c >= 0).ok_or_else(invalid)
}

/// Per-key aggregate broken down by distinct capacity value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityPivot {
    cells: BTreeMap<String, BTreeMap<i64, i64>>,
    totals: BTreeMap<String, i64>,
}

impl CapacityPivot {
    /// Aggregate `(parking row, key, capacity)` triples.
    ///
    /// Fails on the parking row whose contribution overflows its cell or
    /// its key's total.
    pub fn build<I>(rows: I, aggregation: Aggregation) -> Result<Self, InvalidAttributeError>
    where
        I: IntoIterator<Item = (usize, String, i64)>,
    {
        let mut cells: BTreeMap<String, BTreeMap<i64, i64>> = BTreeMap::new();
        let mut totals: BTreeMap<String, i64> = BTreeMap::new();

        for (row, key, capacity) in rows {
            let amount = match aggregation {
                Aggregation::Count => 1,
                Aggregation::CapacitySum => capacity,
            };
            let overflow = || InvalidAttributeError {
                row,
                column: CAPACITY.to_string(),
                value: capacity.to_string(),
            };

            let total = totals.entry(key.clone()).or_insert(0);
            *total = total.checked_add(amount).ok_or_else(overflow)?;
            let cell = cells.entry(key).or_default().entry(capacity).or_insert(0);
            *cell = cell.checked_add(amount).ok_or_else(overflow)?;
        }

        Ok(Self { cells, totals })
    }

    /// Sum across capacity values for every key
    pub fn totals(&self) -> &BTreeMap<String, i64> {
        &self.totals
    }

    pub fn total(&self, key: &str) -> Option<i64> {
        self.totals.get(key).copied()
    }

    pub fn get(&self, key: &str, capacity: i64) -> Option<i64> {
        self.cells.get(key).and_then(|row| row.get(&capacity)).copied()
    }

    /// Distinct capacity values across all keys, ascending
    pub fn capacities(&self) -> Vec<i64> {
        let mut capacities: Vec<i64> = self
            .cells
            .values()
            .flat_map(|row| row.keys().copied())
            .collect();
        capacities.sort_unstable();
        capacities.dedup();
        capacities
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Result of a parking estimation
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Input POI rows with the `No. parking spots` column
    pub enriched: FeatureTable,
    /// Input POI rows with their geometry replaced by the buffer disk
    pub buffered: FeatureTable,
    pub pivot: CapacityPivot,
}

#[derive(Debug, Clone)]
pub struct ParkingEstimator {
    pub aggregation: Aggregation,
    pub buffer_radius: f64,
    pub quad_segs: u32,
    pub merge_key: MergeKey,
    /// CRS of parking files that do not declare one
    pub parking_crs: Option<Crs>,
}

impl ParkingEstimator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            aggregation: config.aggregation,
            buffer_radius: config.buffer_radius,
            quad_segs: config.quad_segs,
            merge_key: config.merge_key,
            parking_crs: config.parking_crs,
        }
    }

    /// Load the parking file and estimate
    pub fn estimate(&self, pois: &FeatureTable, parking_source: &Path) -> Result<Estimate> {
        let parking = read_table_with_crs(parking_source, self.parking_crs)?;
        info!(
            "Loaded {} parking features from {}",
            parking.len(),
            parking_source.display()
        );
        self.estimate_with_table(pois, &parking)
    }

    pub fn estimate_with_table(
        &self,
        pois: &FeatureTable,
        parking: &FeatureTable,
    ) -> Result<Estimate> {
        if !self.buffer_radius.is_finite() || self.buffer_radius < 0.0 {
            return Err(Error::Config(format!(
                "buffer radius must be a non-negative number, got {}",
                self.buffer_radius
            )));
        }

        let key = self.merge_key.column();
        if !pois.is_empty() && !pois.contains_column(key) {
            return Err(Error::MissingColumn(key.to_string()));
        }

        let parking = reproject(parking, pois.crs);

        let mut buffered = buffer_table(pois, self.buffer_radius, self.quad_segs)?;
        buffered.drop_column(INDEX_RIGHT);

        let joined = spatial_join(&buffered, &parking, Predicate::Intersects)?;
        debug!(
            "{} POI buffers intersect parking ({} pairs)",
            buffered.len(),
            joined.len()
        );

        let key_column = if parking.contains_column(key) {
            format!("{}{}", key, LEFT_SUFFIX)
        } else {
            key.to_string()
        };
        let capacity_column = if buffered.contains_column(CAPACITY) {
            format!("{}{}", CAPACITY, RIGHT_SUFFIX)
        } else {
            CAPACITY.to_string()
        };
        if !joined.is_empty() && !joined.contains_column(&capacity_column) {
            return Err(Error::MissingColumn(CAPACITY.to_string()));
        }

        let mut rows = Vec::with_capacity(joined.len());
        for (position, feature) in joined.iter().enumerate() {
            let parking_row = feature
                .get(INDEX_RIGHT)
                .and_then(Value::as_u64)
                .map(|r| r as usize)
                .unwrap_or(position);
            let capacity = coerce_capacity(parking_row, feature.get(&capacity_column))?;
            if let Some(k) = feature.key(&key_column) {
                rows.push((parking_row, k, capacity));
            }
        }

        let pivot = CapacityPivot::build(rows, self.aggregation)?;

        let mut enriched = pois.clone();
        let mut unmatched = 0;
        for feature in &mut enriched.features {
            let total = feature.key(key).and_then(|k| pivot.total(&k));
            if total.is_none() {
                unmatched += 1;
            }
            feature.set(PARKING_SPOTS, total.unwrap_or(0));
        }

        if !pois.is_empty() && unmatched == pois.len() {
            warn!("No POI has parking within {} units", self.buffer_radius);
        }
        info!(
            "Estimated parking ({}) for {} POI rows, {} without nearby parking",
            self.aggregation,
            enriched.len(),
            unmatched
        );

        Ok(Estimate {
            enriched,
            buffered,
            pivot,
        })
    }
}

/// Estimate parking around every POI with the default buffer resolution and
/// merge key
pub fn estimate(
    poi_table: &FeatureTable,
    parking_source: &Path,
    aggregation: Aggregation,
    buffer_radius: f64,
) -> Result<Estimate> {
    let estimator = ParkingEstimator {
        aggregation,
        buffer_radius,
        quad_segs: DEFAULT_QUAD_SEGS,
        merge_key: MergeKey::default(),
        parking_crs: None,
    };
    estimator.estimate(poi_table, parking_source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::models::{Feature, Properties};
    use geo::point;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn poi(x: f64, y: f64, name: Value, id: &str) -> Feature {
        Feature::new(
            point!(x: x, y: y),
            props(json!({"name": name, "poi_id": id, "index_right": 0})),
        )
    }

    fn spot(x: f64, y: f64, capacity: Value) -> Feature {
        Feature::new(
            point!(x: x, y: y),
            props(json!({"name": "Parkplatz", "capacity": capacity})),
        )
    }

    fn crs() -> Crs {
        Crs::from_epsg(25833).unwrap()
    }

    fn pois() -> FeatureTable {
        FeatureTable::with_features(
            crs(),
            vec![
                poi(0.0, 0.0, json!("P1"), "node/1"),
                poi(1000.0, 0.0, json!("P2"), "node/2"),
            ],
        )
    }

    fn parking() -> FeatureTable {
        FeatureTable::with_features(
            crs(),
            vec![spot(5.0, 0.0, json!(2)), spot(0.0, 10.0, json!(4))],
        )
    }

    fn estimator(aggregation: Aggregation) -> ParkingEstimator {
        ParkingEstimator {
            aggregation,
            buffer_radius: 20.0,
            quad_segs: DEFAULT_QUAD_SEGS,
            merge_key: MergeKey::Name,
            parking_crs: None,
        }
    }

    fn spots(table: &FeatureTable) -> Vec<i64> {
        table
            .iter()
            .map(|f| f.get(PARKING_SPOTS).and_then(Value::as_i64).unwrap())
            .collect()
    }

    #[test]
    fn test_count_and_sum() {
        let count = estimator(Aggregation::Count)
            .estimate_with_table(&pois(), &parking())
            .unwrap();
        assert_eq!(spots(&count.enriched), vec![2, 0]);

        let sum = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois(), &parking())
            .unwrap();
        assert_eq!(spots(&sum.enriched), vec![6, 0]);
        assert_eq!(sum.pivot.get("P1", 4), Some(4));
        assert_eq!(sum.pivot.capacities(), vec![2, 4]);
    }

    #[test]
    fn test_buffered_rows() {
        let estimate = estimator(Aggregation::Count)
            .estimate_with_table(&pois(), &parking())
            .unwrap();
        assert_eq!(estimate.buffered.len(), 2);
        assert!(estimate.buffered.iter().all(|f| f.kind() == "Polygon"));
        assert!(!estimate.buffered.contains_column(INDEX_RIGHT));
        // The boundary join index survives on the enriched table
        assert!(estimate.enriched.contains_column(INDEX_RIGHT));
    }

    #[test]
    fn test_shared_name_broadcast() {
        let pois = FeatureTable::with_features(
            crs(),
            vec![
                poi(0.0, 0.0, json!("Cafe X"), "node/1"),
                poi(1000.0, 0.0, json!("Cafe X"), "node/2"),
            ],
        );
        let parking = FeatureTable::with_features(crs(), vec![spot(3.0, 3.0, json!(3))]);

        let by_name = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois, &parking)
            .unwrap();
        assert_eq!(spots(&by_name.enriched), vec![3, 3]);

        let mut by_id = estimator(Aggregation::CapacitySum);
        by_id.merge_key = MergeKey::PoiId;
        let by_id = by_id.estimate_with_table(&pois, &parking).unwrap();
        assert_eq!(spots(&by_id.enriched), vec![3, 0]);
    }

    #[test]
    fn test_null_name_gets_zero() {
        let pois = FeatureTable::with_features(crs(), vec![poi(0.0, 0.0, Value::Null, "node/1")]);
        let estimate = estimator(Aggregation::Count)
            .estimate_with_table(&pois, &parking())
            .unwrap();
        assert_eq!(spots(&estimate.enriched), vec![0]);
        assert!(estimate.pivot.is_empty());
    }

    #[test]
    fn test_zero_radius() {
        let mut estimator = estimator(Aggregation::Count);
        estimator.buffer_radius = 0.0;
        let estimate = estimator.estimate_with_table(&pois(), &parking()).unwrap();
        assert_eq!(spots(&estimate.enriched), vec![0, 0]);
    }

    #[test]
    fn test_negative_radius_rejected() {
        let mut estimator = estimator(Aggregation::Count);
        estimator.buffer_radius = -5.0;
        let result = estimator.estimate_with_table(&pois(), &parking());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_capacity() {
        let parking = FeatureTable::with_features(
            crs(),
            vec![spot(500.0, 0.0, json!(1)), spot(5.0, 0.0, json!("lots"))],
        );
        let err = estimator(Aggregation::Count)
            .estimate_with_table(&pois(), &parking)
            .unwrap_err();
        match err {
            Error::InvalidAttribute(e) => {
                assert_eq!(e.row, 1);
                assert_eq!(e.column, CAPACITY);
                assert_eq!(e.value, "\"lots\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_capacity_rejected() {
        let parking = FeatureTable::with_features(
            crs(),
            vec![spot(5.0, 0.0, json!(2)), spot(0.0, 10.0, json!(-4))],
        );
        let err = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois(), &parking)
            .unwrap_err();
        match err {
            Error::InvalidAttribute(e) => {
                assert_eq!(e.row, 1);
                assert_eq!(e.value, "-4");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_capacity_sum_overflow() {
        let parking = FeatureTable::with_features(
            crs(),
            vec![spot(5.0, 0.0, json!("9e18")), spot(0.0, 10.0, json!("9e18"))],
        );
        let err = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois(), &parking)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute(e) if e.row == 1 && e.column == CAPACITY));

        // Counting the same spots never touches the capacity values
        let count = estimator(Aggregation::Count)
            .estimate_with_table(&pois(), &parking)
            .unwrap();
        assert_eq!(spots(&count.enriched), vec![2, 0]);
    }

    #[test]
    fn test_poi_capacity_column_is_not_summed() {
        let mut pois = pois();
        for feature in &mut pois.features {
            feature.set(CAPACITY, 99);
        }
        let estimate = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois, &parking())
            .unwrap();
        assert_eq!(spots(&estimate.enriched), vec![6, 0]);
        assert_eq!(estimate.pivot.capacities(), vec![2, 4]);
        assert!(estimate.enriched.iter().all(|f| f.get(CAPACITY) == Some(&json!(99))));
    }

    #[test]
    fn test_pivot_totals_never_negative() {
        let rows = [
            (0, "a".to_string(), 0),
            (1, "a".to_string(), 3),
            (2, "b".to_string(), 0),
        ];
        let sum = CapacityPivot::build(rows.clone(), Aggregation::CapacitySum).unwrap();
        assert_eq!(sum.total("a"), Some(3));
        assert_eq!(sum.total("b"), Some(0));
        assert!(sum.totals().values().all(|t| *t >= 0));

        let count = CapacityPivot::build(rows, Aggregation::Count).unwrap();
        assert_eq!(count.total("a"), Some(2));
        assert_eq!(count.get("a", 0), Some(1));
    }

    #[test]
    fn test_missing_capacity_column() {
        let parking = FeatureTable::with_features(
            crs(),
            vec![Feature::new(point!(x: 1.0, y: 1.0), Properties::new())],
        );
        let result = estimator(Aggregation::Count).estimate_with_table(&pois(), &parking);
        assert!(matches!(result, Err(Error::MissingColumn(c)) if c == CAPACITY));
    }

    #[test]
    fn test_parking_reprojected_into_poi_crs() {
        let wgs84 = crate::crs::reproject(&parking(), Crs::Wgs84);
        let estimate = estimator(Aggregation::CapacitySum)
            .estimate_with_table(&pois(), &wgs84)
            .unwrap();
        assert_eq!(spots(&estimate.enriched), vec![6, 0]);
    }

    #[test]
    fn test_coerce_capacity() {
        assert_eq!(coerce_capacity(0, Some(&json!(7))).unwrap(), 7);
        assert_eq!(coerce_capacity(0, Some(&json!(7.9))).unwrap(), 7);
        assert_eq!(coerce_capacity(0, Some(&json!(" 12 "))).unwrap(), 12);
        assert_eq!(coerce_capacity(0, Some(&json!("3.0"))).unwrap(), 3);
        assert_eq!(coerce_capacity(0, Some(&json!(true))).unwrap(), 1);
        assert!(coerce_capacity(0, None).is_err());
        assert!(coerce_capacity(2, Some(&json!([1]))).is_err());
        assert!(coerce_capacity(0, Some(&json!(-4))).is_err());
        assert!(coerce_capacity(0, Some(&json!("-1.5"))).is_err());
        assert_eq!(coerce_capacity(0, Some(&json!("9e18"))).unwrap(), 9_000_000_000_000_000_000);
    }

    #[test]
    fn test_parse_aggregation() {
        assert_eq!("len".parse::<Aggregation>().unwrap(), Aggregation::Count);
        assert_eq!("Sum".parse::<Aggregation>().unwrap(), Aggregation::CapacitySum);
        assert_eq!(Aggregation::CapacitySum.to_string(), "capacity-sum");
        assert!("median".parse::<Aggregation>().is_err());
        assert_eq!("poi-id".parse::<MergeKey>().unwrap(), MergeKey::PoiId);
    }
}
