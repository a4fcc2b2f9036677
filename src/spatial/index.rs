//! Spatial index over the rows of a feature table.

use geo::{BoundingRect, Geometry};
use rstar::{RTree, RTreeObject, AABB};

use crate::models::FeatureTable;

/// Envelope of one table row, keyed by its position
#[derive(Debug, Clone)]
pub struct IndexedFeature {
    pub position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry
        .bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

impl IndexedFeature {
    pub fn new(position: usize, geometry: &Geometry<f64>) -> Option<Self> {
        Some(Self {
            position,
            envelope: envelope_of(geometry)?,
        })
    }
}

/// R-tree over row envelopes; exact predicates are checked by the caller
pub struct FeatureIndex {
    tree: RTree<IndexedFeature>,
}

impl FeatureIndex {
    /// Build the index. Rows with empty geometry have no envelope and are never returned.
    pub fn build(table: &FeatureTable) -> Self {
        let indexed: Vec<IndexedFeature> = table
            .iter()
            .enumerate()
            .filter_map(|(i, f)| IndexedFeature::new(i, &f.geometry))
            .collect();

        Self {
            tree: RTree::bulk_load(indexed),
        }
    }

    /// Positions of rows whose envelope intersects the geometry's envelope, ascending
    pub fn candidates(&self, geometry: &Geometry<f64>) -> Vec<usize> {
        let Some(query) = envelope_of(geometry) else {
            return Vec::new();
        };

        let mut positions: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|f| f.position)
            .collect();
        positions.sort_unstable();
        positions
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::models::Feature;
    use geo::{point, polygon};
    use serde_json::Map;

    #[test]
    fn test_empty_index() {
        let index = FeatureIndex::build(&FeatureTable::new(Crs::Wgs84));
        assert!(index.is_empty());
        assert!(index.candidates(&point!(x: 0.0, y: 0.0).into()).is_empty());
    }

    #[test]
    fn test_candidates_sorted_by_position() {
        let square = |x0: f64| {
            polygon![(x: x0, y: 0.0), (x: x0 + 2.0, y: 0.0), (x: x0 + 2.0, y: 2.0), (x: x0, y: 2.0)]
        };
        let table = FeatureTable::with_features(
            Crs::Wgs84,
            vec![
                Feature::new(square(1.0), Map::new()),
                Feature::new(square(10.0), Map::new()),
                Feature::new(square(0.0), Map::new()),
            ],
        );
        let index = FeatureIndex::build(&table);
        assert_eq!(index.len(), 3);
        assert_eq!(index.candidates(&point!(x: 1.5, y: 1.0).into()), vec![0, 2]);
    }
}
