use geo::{Coord, Geometry, LineString, Point, Polygon};

use crate::error::{Error, Result};
use crate::models::{Feature, FeatureTable};

/// Segments per quarter circle
pub const DEFAULT_QUAD_SEGS: u32 = 16;

/// Approximate a disk of `radius` around `center` by a regular polygon with
/// `4 * quad_segs` vertices (counter-clockwise, starting due east).
///
/// A non-positive radius yields an empty polygon.
pub fn buffer_point(center: Point<f64>, radius: f64, quad_segs: u32) -> Polygon<f64> {
    if radius <= 0.0 {
        return Polygon::new(LineString::new(vec![]), vec![]);
    }

    let segments = 4 * quad_segs.max(1);
    let step = std::f64::consts::TAU / segments as f64;

    let mut ring: Vec<Coord<f64>> = (0..segments)
        .map(|i| {
            let angle = step * i as f64;
            Coord {
                x: center.x() + radius * angle.cos(),
                y: center.y() + radius * angle.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);

    Polygon::new(LineString::new(ring), vec![])
}

/// Replace every point geometry of a table with its buffer polygon
pub fn buffer_table(table: &FeatureTable, radius: f64, quad_segs: u32) -> Result<FeatureTable> {
    let features = table
        .iter()
        .enumerate()
        .map(|(row, f)| match f.geometry {
            Geometry::Point(p) => Ok(Feature {
                geometry: buffer_point(p, radius, quad_segs).into(),
                properties: f.properties.clone(),
            }),
            _ => Err(Error::InvalidGeometry {
                row,
                kind: f.kind(),
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FeatureTable::with_features(table.crs, features))
}
