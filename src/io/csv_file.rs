use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use geo::Point;
use serde_json::{Number, Value};
use tracing::warn;

use crate::crs::Crs;
use crate::error::DataLoadError;
use crate::models::{Feature, FeatureTable, Properties};

/// Coordinate column pairs, in lookup order
const COORD_COLUMNS: [(&str, &str); 3] = [("lon", "lat"), ("lng", "lat"), ("x", "y")];

fn parse_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(cell.to_string())
}

/// Read a point CSV with `lon`/`lat` (always WGS84) or `x`/`y` columns (in `crs_hint`)
pub(super) fn read_csv(
    path: &Path,
    reader: Box<dyn Read>,
    crs_hint: Option<Crs>,
) -> Result<FeatureTable, DataLoadError> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| DataLoadError::new(path, e))?
        .clone();

    let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let (x_idx, y_idx, projected) = COORD_COLUMNS
        .iter()
        .find_map(|&(x, y)| Some((position(x)?, position(y)?, x == "x")))
        .ok_or_else(|| DataLoadError::new(path, "no lon/lat or x/y columns"))?;

    let crs = match (crs_hint, projected) {
        (_, false) => Crs::Wgs84,
        (Some(crs), true) => crs,
        (None, true) => {
            return Err(DataLoadError::new(
                path,
                "x/y columns need an explicit coordinate reference system",
            ))
        }
    };

    let mut table = FeatureTable::new(crs);
    for (i, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| DataLoadError::new(path, e))?;

        let coord = |idx: usize| record.get(idx).and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(x), Some(y)) = (coord(x_idx), coord(y_idx)) else {
            warn!("Skipping row {} of {}: missing coordinates", i, path.display());
            continue;
        };

        let mut properties = Properties::new();
        for (idx, (header, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if idx != x_idx && idx != y_idx {
                properties.insert(header.to_string(), parse_cell(cell));
            }
        }

        table.push(Feature::new(Point::new(x, y), properties));
    }

    Ok(table)
}
