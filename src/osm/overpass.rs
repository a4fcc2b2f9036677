//! Online feature source: Nominatim geocoding + Overpass API queries.

use std::collections::HashMap;
use std::time::Duration;

use geo::{Coord, Geometry, LineString, Point, Polygon};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use super::geometry::merge_rings_to_polygons;
use super::source::{osm_properties, FeatureSource};
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureTable, TagFilter, TagValues};

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

const USER_AGENT: &str = "parkspot/0.1 (POI parking enrichment)";

/// Overpass area ids are derived from the element id
const RELATION_AREA_OFFSET: u64 = 3_600_000_000;
const WAY_AREA_OFFSET: u64 = 2_400_000_000;

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    osm_type: String,
    osm_id: u64,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl From<&LatLon> for Coord<f64> {
    fn from(p: &LatLon) -> Self {
        Coord { x: p.lon, y: p.lat }
    }
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    member_type: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<LatLon>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Way {
        id: i64,
        #[serde(default)]
        geometry: Vec<LatLon>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Relation {
        id: i64,
        #[serde(default)]
        members: Vec<Member>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
}

fn way_geometry(points: &[LatLon]) -> Option<Geometry<f64>> {
    let coords: Vec<Coord<f64>> = points.iter().map(Coord::from).collect();
    if coords.len() < 2 {
        return None;
    }
    if coords.len() >= 4 && coords.first() == coords.last() {
        return Some(Polygon::new(LineString::new(coords), vec![]).into());
    }
    Some(LineString::new(coords).into())
}

fn relation_geometry(members: &[Member]) -> Option<Geometry<f64>> {
    let rings: Vec<Vec<Coord<f64>>> = members
        .iter()
        .filter(|m| m.member_type == "way" && (m.role == "outer" || m.role.is_empty()))
        .map(|m| m.geometry.iter().map(Coord::from).collect::<Vec<_>>())
        .filter(|coords| coords.len() >= 2)
        .collect();

    let polygons = merge_rings_to_polygons(rings);
    (!polygons.is_empty()).then(|| geo::MultiPolygon::new(polygons).into())
}

fn element_to_feature(element: &Element) -> Option<Feature> {
    let (element_type, id, geometry, tags) = match element {
        Element::Node { id, lat, lon, tags } => {
            ("node", *id, Some(Geometry::Point(Point::new(*lon, *lat))), tags)
        }
        Element::Way { id, geometry, tags } => ("way", *id, way_geometry(geometry), tags),
        Element::Relation { id, members, tags } => {
            ("relation", *id, relation_geometry(members), tags)
        }
    };

    let Some(geometry) = geometry else {
        debug!("No usable geometry for {}/{}", element_type, id);
        return None;
    };

    let properties = osm_properties(
        element_type,
        id,
        tags.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    );
    Some(Feature::new(geometry, properties))
}

fn parse_response(body: &str) -> Result<FeatureTable> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|e| Error::Source(format!("Overpass: {}", e)))?;

    let features = response
        .elements
        .iter()
        .filter_map(element_to_feature)
        .collect();
    Ok(FeatureTable::with_features(Crs::Wgs84, features))
}

/// Quote a string for use inside an Overpass QL double-quoted literal
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Build an Overpass QL query for all elements matching `tags` inside an area
pub fn build_query(area_id: u64, tags: &TagFilter, timeout_secs: u64) -> String {
    let mut query = format!(
        "[out:json][timeout:{}];\narea(id:{})->.searchArea;\n(\n",
        timeout_secs, area_id
    );
    for (key, values) in tags.iter() {
        let filter = match values {
            TagValues::Any => format!("[{}]", quote(key)),
            TagValues::Values(vs) => {
                let alternatives: Vec<String> = vs.iter().map(|v| regex::escape(v)).collect();
                format!(
                    "[{}~{}]",
                    quote(key),
                    quote(&format!("^({})$", alternatives.join("|")))
                )
            }
        };
        query.push_str(&format!("  nwr{}(area.searchArea);\n", filter));
    }
    query.push_str(");\nout geom;\n");
    query
}

/// Queries the public Overpass API for features within a geocoded place
pub struct OverpassSource {
    client: Client,
    overpass_url: Url,
    nominatim_url: Url,
    timeout_secs: u64,
}

impl OverpassSource {
    pub fn new(overpass_url: &str, nominatim_url: &str, timeout_secs: u64) -> Result<Self> {
        let parse = |u: &str| Url::parse(u).map_err(|e| Error::Config(format!("{}: {}", u, e)));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs + 30))
            .build()
            .map_err(|e| Error::Source(e.to_string()))?;

        Ok(Self {
            client,
            overpass_url: parse(overpass_url)?,
            nominatim_url: parse(nominatim_url)?,
            timeout_secs,
        })
    }

    /// Geocode a place name to an Overpass area id
    async fn resolve_area(&self, place: &str) -> Result<u64> {
        let mut url = self.nominatim_url.clone();
        url.query_pairs_mut()
            .append_pair("q", place)
            .append_pair("format", "json")
            .append_pair("limit", "10");

        let places: Vec<NominatimPlace> = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Source(format!("Nominatim: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Source(format!("Nominatim: {}", e)))?;

        let area = places.iter().find_map(|p| match p.osm_type.as_str() {
            "relation" => Some((p, RELATION_AREA_OFFSET + p.osm_id)),
            "way" => Some((p, WAY_AREA_OFFSET + p.osm_id)),
            _ => None,
        });

        match area {
            Some((p, area_id)) => {
                info!("Resolved '{}' to {} (area {})", place, p.display_name, area_id);
                Ok(area_id)
            }
            None => Err(Error::Source(format!(
                "Nominatim found no area for '{}'",
                place
            ))),
        }
    }
}

impl FeatureSource for OverpassSource {
    async fn query(&self, place: &str, tags: &TagFilter) -> Result<FeatureTable> {
        if tags.is_empty() {
            warn!("Empty tag filter, nothing to query");
            return Ok(FeatureTable::new(Crs::Wgs84));
        }

        let area_id = self.resolve_area(place).await?;
        let query = build_query(area_id, tags, self.timeout_secs);
        debug!("Overpass query:\n{}", query);

        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("data", &query)
            .finish();

        let body = self
            .client
            .post(self.overpass_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Source(format!("Overpass: {}", e)))?
            .text()
            .await
            .map_err(|e| Error::Source(format!("Overpass: {}", e)))?;

        let table = parse_response(&body)?;
        info!("Overpass returned {} features for '{}'", table.len(), place);
        Ok(table)
    }
}
