//! Coordinate reference systems and reprojection.
//!
//! Every transformation goes through geographic WGS84 longitude/latitude.
//! Supported targets are Web Mercator and the UTM zones (WGS84 and ETRS89);
//! the datum shift between ETRS89 and WGS84 is ignored.

mod transverse_mercator;

use geo::MapCoords;
use geo_types::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Feature, FeatureTable};
use transverse_mercator::TransverseMercator;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Reference ellipsoid of a UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datum {
    Wgs84,
    /// ETRS89 (GRS80 ellipsoid)
    Etrs89,
}

impl Datum {
    fn inverse_flattening(&self) -> f64 {
        match self {
            Datum::Wgs84 => 298.257_223_563,
            Datum::Etrs89 => 298.257_222_101,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude (GeoJSON axis order)
    Wgs84,
    /// EPSG:3857
    WebMercator,
    /// EPSG:326zz / 327zz (WGS84) or EPSG:258zz (ETRS89)
    Utm { zone: u8, north: bool, datum: Datum },
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        let crs = match code {
            4326 => Crs::Wgs84,
            3857 | 900913 => Crs::WebMercator,
            32601..=32660 => Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
                datum: Datum::Wgs84,
            },
            32701..=32760 => Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
                datum: Datum::Wgs84,
            },
            // ETRS89 / UTM is only defined for zones 28 to 38
            25828..=25838 => Crs::Utm {
                zone: (code - 25800) as u8,
                north: true,
                datum: Datum::Etrs89,
            },
            _ => return Err(Error::UnsupportedCrs(format!("EPSG:{}", code))),
        };
        Ok(crs)
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm {
                zone,
                north: true,
                datum: Datum::Wgs84,
            } => 32600 + zone as u32,
            Crs::Utm {
                zone,
                north: false,
                datum: Datum::Wgs84,
            } => 32700 + zone as u32,
            Crs::Utm {
                zone,
                datum: Datum::Etrs89,
                ..
            } => 25800 + zone as u32,
        }
    }

    /// True if coordinates are degrees rather than metres
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Convert a coordinate in this CRS to WGS84 lon/lat
    pub fn to_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => Coord {
                x: (c.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (c.y / WEB_MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
                    .to_degrees(),
            },
            Crs::Utm { zone, north, datum } => {
                let (lon, lat) = TransverseMercator::utm(*zone, *north, datum.inverse_flattening())
                    .inverse(c.x, c.y);
                Coord { x: lon, y: lat }
            }
        }
    }

    /// Convert a WGS84 lon/lat coordinate into this CRS
    pub fn from_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => {
                let lat = c.y.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
                Coord {
                    x: WEB_MERCATOR_RADIUS * c.x.to_radians(),
                    y: WEB_MERCATOR_RADIUS
                        * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
                            .tan()
                            .ln(),
                }
            }
            Crs::Utm { zone, north, datum } => {
                let (x, y) = TransverseMercator::utm(*zone, *north, datum.inverse_flattening())
                    .forward(c.x, c.y);
                Coord { x, y }
            }
        }
    }
}

impl FromStr for Crs {
    type Err = Error;

    /// Accepts `EPSG:25833`, bare codes, and the OGC URN forms used in GeoJSON
    /// `crs` members (`urn:ogc:def:crs:EPSG::25833`, `urn:ogc:def:crs:OGC:1.3:CRS84`).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }

        let code = if let Some(rest) = upper.strip_prefix("EPSG:") {
            rest
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            upper.rsplit(':').next().unwrap_or("")
        } else {
            upper.as_str()
        };

        code.parse::<u32>()
            .map_err(|_| Error::UnsupportedCrs(trimmed.to_string()))
            .and_then(Crs::from_epsg)
    }
}

impl TryFrom<String> for Crs {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Reproject every geometry of a table into `target`
pub fn reproject(table: &FeatureTable, target: Crs) -> FeatureTable {
    let source = table.crs;
    if source == target {
        return table.clone();
    }

    debug!(
        "Reprojecting {} features from {} to {}",
        table.len(),
        source,
        target
    );

    let features = table
        .iter()
        .map(|f| Feature {
            geometry: f
                .geometry
                .map_coords(|c| target.from_geographic(source.to_geographic(c))),
            properties: f.properties.clone(),
        })
        .collect();

    FeatureTable::with_features(target, features)
}
