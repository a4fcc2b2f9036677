//! POI parking enrichment.
//!
//! Extracts tagged POIs for a place, attributes them to boundary regions,
//! and estimates the parking capacity around each one.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use parkspot::crs::Crs;
use parkspot::io::write_table;
use parkspot::models::{FeatureTable, TagFilter};
use parkspot::osm::{FeatureSource, OverpassSource, PbfSource};
use parkspot::pipeline::{run_pipeline, Aggregation, Estimate, MergeKey, PARKING_SPOTS};
use parkspot::spatial::INDEX_RIGHT;
use parkspot::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(about = "Estimate parking capacity around OSM points of interest")]
struct Args {
    /// Boundary (LOR) polygon file
    #[arg(short, long)]
    boundaries: Option<PathBuf>,

    /// Parking spot file with a `capacity` column
    #[arg(short, long)]
    parking: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Place queried from the feature source
    #[arg(long)]
    place: Option<String>,

    /// CRS of a boundary file that does not declare one
    #[arg(long)]
    boundaries_crs: Option<Crs>,

    /// CRS of a parking file that does not declare one (e.g. x/y CSV)
    #[arg(long)]
    parking_crs: Option<Crs>,

    /// Working CRS, e.g. EPSG:25833
    #[arg(long)]
    crs: Option<Crs>,

    /// Buffer radius around each POI, in working CRS units
    #[arg(long)]
    buffer_radius: Option<f64>,

    /// Aggregation: count or capacity-sum
    #[arg(long)]
    aggregation: Option<Aggregation>,

    /// Merge key: name or poi_id
    #[arg(long)]
    merge_key: Option<MergeKey>,

    /// Tag filter `key=v1,v2` or `key`; replaces the configured tags
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Read features from a local OSM PBF extract instead of Overpass
    #[arg(long)]
    pbf: Option<PathBuf>,

    /// Boundary column used in the summary (defaults to the region position)
    #[arg(long)]
    region_column: Option<String>,

    /// Enriched POI output (GeoJSON)
    #[arg(short, long)]
    output: PathBuf,

    /// Buffered POI output (GeoJSON)
    #[arg(long)]
    buffered_output: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.boundaries {
        config.boundaries = Some(path.clone());
    }
    if let Some(path) = &args.parking {
        config.parking = Some(path.clone());
    }
    if let Some(crs) = args.boundaries_crs {
        config.boundaries_crs = Some(crs);
    }
    if let Some(crs) = args.parking_crs {
        config.parking_crs = Some(crs);
    }
    if let Some(place) = &args.place {
        config.place = place.clone();
    }
    if let Some(crs) = args.crs {
        config.crs = crs;
    }
    if let Some(radius) = args.buffer_radius {
        config.buffer_radius = radius;
    }
    if let Some(aggregation) = args.aggregation {
        config.aggregation = aggregation;
    }
    if let Some(merge_key) = args.merge_key {
        config.merge_key = merge_key;
    }
    if !args.tags.is_empty() {
        let mut tags = TagFilter::new();
        for expr in &args.tags {
            tags.insert_expr(expr).map_err(anyhow::Error::msg)?;
        }
        config.tags = tags;
    }
    if let Some(path) = &args.pbf {
        config.source.pbf = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn run<S: FeatureSource>(config: &PipelineConfig, source: &S) -> Result<Estimate> {
    run_pipeline(config, source)
        .await
        .context("Enrichment pipeline failed")
}

/// Log POI count and parking total per boundary region
fn log_summary(enriched: &FeatureTable, region_column: Option<&str>) {
    let column = region_column.unwrap_or(INDEX_RIGHT);
    let mut regions: BTreeMap<String, (usize, i64)> = BTreeMap::new();
    for feature in enriched.iter() {
        let region = feature.key(column).unwrap_or_else(|| "-".to_string());
        let spots = feature
            .get(PARKING_SPOTS)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let entry = regions.entry(region).or_default();
        entry.0 += 1;
        entry.1 += spots;
    }

    for (region, (pois, spots)) in &regions {
        info!("  {} = {}: {} POIs, {} parking spots", column, region, pois, spots);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = build_config(&args)?;

    info!("Parkspot Enrichment Pipeline");
    info!("Place: {}", config.place);
    info!("CRS: {}", config.crs);
    info!(
        "Aggregation: {} within {} units",
        config.aggregation, config.buffer_radius
    );

    let estimate = match &config.source.pbf {
        Some(path) => run(&config, &PbfSource::new(path)).await?,
        None => {
            let source = OverpassSource::new(
                &config.source.overpass_url,
                &config.source.nominatim_url,
                config.source.timeout_secs,
            )
            .context("Failed to create Overpass client")?;
            run(&config, &source).await?
        }
    };

    write_table(&args.output, &estimate.enriched)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if let Some(path) = &args.buffered_output {
        write_table(path, &estimate.buffered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    info!("Summary:");
    log_summary(&estimate.enriched, args.region_column.as_deref());
    info!("Done!");

    Ok(())
}
