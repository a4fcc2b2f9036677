//! Inner spatial join between two feature tables.

use geo::{Contains, Geometry, Intersects};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::FeatureIndex;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureTable, Properties};

/// Column holding the position of the matched right-hand row
pub const INDEX_RIGHT: &str = "index_right";
pub const LEFT_SUFFIX: &str = "_left";
pub const RIGHT_SUFFIX: &str = "_right";

/// Geometric test applied to (left, right) geometry pairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Intersects,
    /// Left geometry lies inside the right one
    Within,
    /// Left geometry contains the right one
    Contains,
}

impl Predicate {
    pub fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
        match self {
            Predicate::Intersects => left.intersects(right),
            Predicate::Within => right.contains(left),
            Predicate::Contains => left.contains(right),
        }
    }
}

/// Join every left row with every right row satisfying `predicate`.
///
/// Rows without a match are dropped and rows with several matches are
/// repeated. Output keeps left row order, with matches ordered by right row
/// position, and keeps the left geometry. Column names present on both sides
/// get `_left` / `_right` suffixes and the right row position is stored in
/// `index_right`.
pub fn spatial_join(
    left: &FeatureTable,
    right: &FeatureTable,
    predicate: Predicate,
) -> Result<FeatureTable> {
    if left.crs != right.crs {
        return Err(Error::CrsMismatch {
            left: left.crs.to_string(),
            right: right.crs.to_string(),
        });
    }
    if left.contains_column(INDEX_RIGHT) {
        return Err(Error::ColumnConflict(INDEX_RIGHT.to_string()));
    }

    let left_columns = left.columns();
    let right_columns: HashSet<String> = right.columns().into_iter().collect();
    let shared: HashSet<&str> = left_columns
        .iter()
        .filter(|c| right_columns.contains(*c))
        .map(String::as_str)
        .collect();

    let index = FeatureIndex::build(right);
    let mut joined = FeatureTable::new(left.crs);
    if index.is_empty() {
        debug!("Spatial join: no right-hand geometries to match");
        return Ok(joined);
    }

    for left_feature in left.iter() {
        for position in index.candidates(&left_feature.geometry) {
            let right_feature = &right.features[position];
            if !predicate.evaluate(&left_feature.geometry, &right_feature.geometry) {
                continue;
            }

            let mut properties = Properties::new();
            for (key, value) in &left_feature.properties {
                let key = if shared.contains(key.as_str()) {
                    format!("{}{}", key, LEFT_SUFFIX)
                } else {
                    key.clone()
                };
                properties.insert(key, value.clone());
            }
            properties.insert(INDEX_RIGHT.to_string(), position.into());
            for (key, value) in &right_feature.properties {
                let key = if shared.contains(key.as_str()) {
                    format!("{}{}", key, RIGHT_SUFFIX)
                } else {
                    key.clone()
                };
                properties.insert(key, value.clone());
            }

            joined.push(Feature::new(left_feature.geometry.clone(), properties));
        }
    }

    debug!(
        "Spatial join ({:?}): {} x {} rows ({} indexed) -> {} rows",
        predicate,
        left.len(),
        right.len(),
        index.len(),
        joined.len()
    );

    Ok(joined)
}
