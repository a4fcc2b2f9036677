use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use geojson::{FeatureCollection, GeoJson, JsonObject};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::crs::Crs;
use crate::error::{DataLoadError, Error, Result};
use crate::models::{Feature, FeatureTable};

/// Read the legacy `crs` member (`{"type": "name", "properties": {"name": ...}}`)
fn declared_crs(path: &Path, members: Option<&JsonObject>) -> Result<Option<Crs>, DataLoadError> {
    let name = members
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(Value::as_str);

    match name {
        Some(name) => name
            .parse()
            .map(Some)
            .map_err(|e: Error| DataLoadError::new(path, e)),
        None => Ok(None),
    }
}

pub(super) fn read_geojson(
    path: &Path,
    mut reader: Box<dyn Read>,
    crs_hint: Option<Crs>,
) -> Result<FeatureTable, DataLoadError> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| DataLoadError::new(path, e))?;

    let geojson: GeoJson = content
        .parse()
        .map_err(|e: geojson::Error| DataLoadError::new(path, e))?;

    let (features, members) = match geojson {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => {
            let members = f.foreign_members.clone();
            (vec![f], members)
        }
        GeoJson::Geometry(g) => (vec![geojson::Feature::from(g)], None),
    };

    let crs = declared_crs(path, members.as_ref())?
        .or(crs_hint)
        .unwrap_or(Crs::Wgs84);

    let mut table = FeatureTable::new(crs);
    for (i, feature) in features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            warn!("Skipping feature {} of {}: no geometry", i, path.display());
            continue;
        };

        let geometry = geo::Geometry::<f64>::try_from(geometry)
            .map_err(|e| DataLoadError::new(path, format!("feature {}: {}", i, e)))?;

        table.push(Feature::new(geometry, feature.properties.unwrap_or_default()));
    }

    debug!("Parsed {} features from {}", table.len(), path.display());
    Ok(table)
}

pub fn write_geojson(path: &Path, table: &FeatureTable) -> Result<()> {
    let write_err = |reason: String| Error::Write {
        path: path.to_path_buf(),
        reason,
    };

    let features = table
        .iter()
        .map(|f| geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&f.geometry))),
            id: None,
            properties: Some(f.properties.clone()),
            foreign_members: None,
        })
        .collect();

    // RFC 7946 files are WGS84 only; anything else carries the legacy member
    let foreign_members = (table.crs != Crs::Wgs84).then(|| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", table.crs.epsg()) }
            }),
        );
        members
    });

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    };

    let file = File::create(path).map_err(|e| write_err(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &collection).map_err(|e| write_err(e.to_string()))?;
    writer.flush().map_err(|e| write_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_table;
    use geo::{point, Geometry};
    use serde_json::Map;

    #[test]
    fn test_reads_legacy_crs_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lor.geojson");
        std::fs::write(
            &path,
            r#"{
                "type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::25833"}},
                "features": [
                    {"type": "Feature", "properties": {"PLR_ID": "0100101"},
                     "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
                    {"type": "Feature", "properties": {"PLR_ID": "broken"}, "geometry": null}
                ]
            }"#,
        )
        .unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.crs, Crs::from_epsg(25833).unwrap());
        assert_eq!(table.len(), 1);
        assert!(matches!(table.features[0].geometry, Geometry::Polygon(_)));
        assert_eq!(table.features[0].key("PLR_ID").as_deref(), Some("0100101"));
    }

    #[test]
    fn test_unwritable_path_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.geojson");
        let table = FeatureTable::new(Crs::Wgs84);
        assert!(matches!(write_geojson(&path, &table), Err(Error::Write { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_flush_is_write_error() {
        // The collection fits in the buffer, so only the final flush hits ENOSPC
        let table = FeatureTable::new(Crs::Wgs84);
        let result = write_geojson(Path::new("/dev/full"), &table);
        assert!(matches!(result, Err(Error::Write { .. })));
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.geojson");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_table(&path).is_err());
    }

    #[test]
    fn test_write_then_read_keeps_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");

        let mut props = Map::new();
        props.insert("name".into(), json!("Cafe X"));
        let table = FeatureTable::with_features(
            Crs::from_epsg(25833).unwrap(),
            vec![Feature::new(point!(x: 390_000.0, y: 5_820_000.0), props)],
        );

        write_geojson(&path, &table).unwrap();
        let read_back = read_table(&path).unwrap();
        assert_eq!(read_back, table);
    }
}
