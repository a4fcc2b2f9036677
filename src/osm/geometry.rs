//! Geometry resolution for OSM ways and relations read from a PBF extract.

use geo::{Coord, Geometry, LineString, MultiPolygon, Polygon};
use hashbrown::{HashMap, HashSet};
use osmpbfreader::{NodeId, OsmId, OsmObj, OsmPbfReader, RelationId, Tags, WayId};
use sled::Db;
use std::io::{Read, Seek};
use tempfile::{Builder, TempDir};
use tracing::info;

use crate::error::{Error, Result};

fn source_err(e: impl ToString) -> Error {
    Error::Source(e.to_string())
}

/// Stores node coordinates on disk and way/relation membership in memory
pub struct GeometryResolver {
    node_db: Db,
    way_nodes: HashMap<WayId, Vec<NodeId>>,
    relation_members: HashMap<RelationId, Vec<WayId>>,
    // Keeps the sled directory alive for as long as the resolver
    _dir: TempDir,
}

impl GeometryResolver {
    /// Scan the file and keep what is needed to build geometries for the
    /// relations accepted by `keep_relation` and the ways accepted by `keep_way`
    pub fn build<R, FR, FW>(
        reader: &mut OsmPbfReader<R>,
        keep_relation: FR,
        keep_way: FW,
    ) -> Result<Self>
    where
        R: Read + Seek,
        FR: Fn(&Tags) -> bool,
        FW: Fn(&Tags) -> bool,
    {
        info!("Building geometry index...");

        let mut needed_ways = HashSet::new();
        let mut needed_nodes = HashSet::new();
        let mut relation_members = HashMap::new();
        let mut way_nodes = HashMap::new();

        info!("Pass 1/3: Identifying relevant relations...");
        reader.rewind().map_err(source_err)?;
        for obj in reader.iter() {
            let OsmObj::Relation(rel) = obj.map_err(source_err)? else {
                continue;
            };
            if !keep_relation(&rel.tags) {
                continue;
            }
            let ways: Vec<WayId> = rel
                .refs
                .iter()
                .filter(|m| m.role == "outer" || m.role.is_empty())
                .filter_map(|m| match m.member {
                    OsmId::Way(way_id) => Some(way_id),
                    _ => None,
                })
                .collect();
            needed_ways.extend(ways.iter().copied());
            relation_members.insert(rel.id, ways);
        }
        info!("Found {} relevant relations", relation_members.len());

        info!("Pass 2/3: Identifying relevant ways...");
        reader.rewind().map_err(source_err)?;
        for obj in reader.iter() {
            let OsmObj::Way(way) = obj.map_err(source_err)? else {
                continue;
            };
            if needed_ways.contains(&way.id) || keep_way(&way.tags) {
                needed_nodes.extend(way.nodes.iter().copied());
                way_nodes.insert(way.id, way.nodes);
            }
        }
        info!(
            "Found {} relevant ways, referencing {} nodes",
            way_nodes.len(),
            needed_nodes.len()
        );

        info!("Pass 3/3: Storing node coordinates...");
        reader.rewind().map_err(source_err)?;

        let dir = Builder::new()
            .prefix("parkspot-geo-")
            .tempdir()
            .map_err(source_err)?;
        let db = sled::open(dir.path()).map_err(source_err)?;

        let mut stored_count = 0;
        for obj in reader.iter() {
            let OsmObj::Node(node) = obj.map_err(source_err)? else {
                continue;
            };
            if needed_nodes.contains(&node.id) {
                let mut value = [0u8; 16];
                value[0..8].copy_from_slice(&node.lon().to_be_bytes());
                value[8..16].copy_from_slice(&node.lat().to_be_bytes());
                db.insert(node.id.0.to_be_bytes(), &value)
                    .map_err(source_err)?;
                stored_count += 1;
            }
        }
        db.flush().map_err(source_err)?;
        info!("Stored {} node coordinates", stored_count);

        Ok(Self {
            node_db: db,
            way_nodes,
            relation_members,
            _dir: dir,
        })
    }

    fn node_coord(&self, node: NodeId) -> Option<Coord<f64>> {
        let bytes = self.node_db.get(node.0.to_be_bytes()).ok()??;
        let lon: [u8; 8] = bytes.get(0..8)?.try_into().ok()?;
        let lat: [u8; 8] = bytes.get(8..16)?.try_into().ok()?;
        Some(Coord {
            x: f64::from_be_bytes(lon),
            y: f64::from_be_bytes(lat),
        })
    }

    fn way_coords(&self, way_id: WayId) -> Option<Vec<Coord<f64>>> {
        let nodes = self.way_nodes.get(&way_id)?;
        Some(nodes.iter().filter_map(|n| self.node_coord(*n)).collect())
    }

    /// Closed ways become polygons, open ways line strings
    pub fn resolve_way(&self, way_id: WayId) -> Option<Geometry<f64>> {
        let coords = self.way_coords(way_id)?;
        if coords.len() < 2 {
            return None;
        }
        if coords.len() >= 4 && coords.first() == coords.last() {
            return Some(Polygon::new(LineString::new(coords), vec![]).into());
        }
        Some(LineString::new(coords).into())
    }

    /// Assemble the outer member ways of a relation into a multipolygon
    pub fn resolve_relation(&self, rel_id: RelationId) -> Option<MultiPolygon<f64>> {
        let rings: Vec<Vec<Coord<f64>>> = self
            .relation_members
            .get(&rel_id)?
            .iter()
            .filter_map(|w| self.way_coords(*w))
            .filter(|coords| coords.len() >= 2)
            .collect();

        let polygons = merge_rings_to_polygons(rings);
        (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
    }
}

/// Join ring fragments sharing end points into closed polygons.
///
/// Fragments that cannot be closed into a ring of at least four coordinates
/// are discarded.
pub fn merge_rings_to_polygons(rings: Vec<Vec<Coord<f64>>>) -> Vec<Polygon<f64>> {
    let mut polygons = Vec::new();
    let mut remaining = rings;

    while !remaining.is_empty() {
        let mut current = remaining.remove(0);

        while current.first() != current.last() {
            let Some(next) = remaining.iter().position(|r| {
                r.first() == current.last()
                    || r.last() == current.last()
                    || r.last() == current.first()
                    || r.first() == current.first()
            }) else {
                break;
            };

            let mut fragment = remaining.remove(next);
            if fragment.first() == current.last() {
                current.extend(fragment.drain(1..));
            } else if fragment.last() == current.last() {
                fragment.reverse();
                current.extend(fragment.drain(1..));
            } else {
                if fragment.first() == current.first() {
                    fragment.reverse();
                }
                fragment.pop();
                fragment.extend(current);
                current = fragment;
            }
        }

        if current.len() >= 3 && current.first() != current.last() {
            current.push(current[0]);
        }
        if current.len() >= 4 {
            polygons.push(Polygon::new(LineString::new(current), vec![]));
        }
    }

    polygons
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: Coord<f64> = Coord { x: 0.0, y: 0.0 };
    const P2: Coord<f64> = Coord { x: 1.0, y: 0.0 };
    const P3: Coord<f64> = Coord { x: 1.0, y: 1.0 };
    const P4: Coord<f64> = Coord { x: 0.0, y: 1.0 };

    #[test]
    fn test_merge_closed_ring() {
        let polygons = merge_rings_to_polygons(vec![vec![P1, P2, P3, P4, P1]]);
        assert_eq!(polygons.len(), 1);
    }

    #[test]
    fn test_merge_split_ring_any_order() {
        for fragments in [
            vec![vec![P1, P2, P3], vec![P3, P4, P1]],
            vec![vec![P3, P4, P1], vec![P1, P2, P3]],
            // Second fragment digitised in the opposite direction
            vec![vec![P1, P2, P3], vec![P1, P4, P3]],
        ] {
            let polygons = merge_rings_to_polygons(fragments);
            assert_eq!(polygons.len(), 1);
            assert_eq!(polygons[0].exterior().0.len(), 5);
        }
    }

    #[test]
    fn test_merge_gap_fails() {
        let polygons = merge_rings_to_polygons(vec![vec![P1, P2], vec![P3, P4]]);
        assert!(polygons.is_empty());
    }
}
