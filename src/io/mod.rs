//! Reading and writing geospatial files.
//!
//! GeoJSON (optionally gzip-compressed) and point CSV files are supported.
//! Format detection is by file extension.

mod csv_file;
mod geojson_file;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::info;

use crate::crs::Crs;
use crate::error::{DataLoadError, Result};
use crate::models::FeatureTable;

pub use geojson_file::write_geojson;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    GeoJson,
    Csv,
}

fn detect_format(path: &Path) -> Result<(Format, bool), DataLoadError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (stem, compressed) = match name.strip_suffix(".gz") {
        Some(stem) => (stem.to_string(), true),
        None => (name, false),
    };

    let format = match Path::new(&stem).extension().and_then(|e| e.to_str()) {
        Some("geojson") | Some("json") => Format::GeoJson,
        Some("csv") => Format::Csv,
        other => {
            return Err(DataLoadError::new(
                path,
                format!("unsupported file type {:?}", other.unwrap_or("")),
            ))
        }
    };
    Ok((format, compressed))
}

fn open(path: &Path, compressed: bool) -> Result<Box<dyn Read>, DataLoadError> {
    let file = File::open(path).map_err(|e| DataLoadError::new(path, e))?;
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(reader)
}

/// Load a geospatial file into a table
pub fn read_table(path: impl AsRef<Path>) -> Result<FeatureTable, DataLoadError> {
    read_table_with_crs(path, None)
}

/// Load a geospatial file, using `crs_hint` when the file does not declare one
pub fn read_table_with_crs(
    path: impl AsRef<Path>,
    crs_hint: Option<Crs>,
) -> Result<FeatureTable, DataLoadError> {
    let path = path.as_ref();
    let (format, compressed) = detect_format(path)?;
    let reader = open(path, compressed)?;

    let table = match format {
        Format::GeoJson => geojson_file::read_geojson(path, reader, crs_hint)?,
        Format::Csv => csv_file::read_csv(path, reader, crs_hint)?,
    };

    info!(
        "Loaded {} features ({}) from {}",
        table.len(),
        table.crs,
        path.display()
    );
    Ok(table)
}

/// Write a table as a GeoJSON FeatureCollection
pub fn write_table(path: impl AsRef<Path>, table: &FeatureTable) -> Result<()> {
    let path = path.as_ref();
    write_geojson(path, table)?;
    info!("Wrote {} features to {}", table.len(), path.display());
    Ok(())
}
