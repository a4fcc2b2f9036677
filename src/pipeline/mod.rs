//! The two pipeline stages, POI extraction followed by parking estimation.

mod estimator;
mod extractor;

pub use estimator::{
    coerce_capacity, estimate, Aggregation, CapacityPivot, Estimate, MergeKey, ParkingEstimator,
    CAPACITY, PARKING_SPOTS,
};
pub use extractor::{extract, ColumnPrune, PoiExtractor, NAME, POI_ID};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::osm::FeatureSource;

/// Run both stages with the files named in `config`
pub async fn run_pipeline<S: FeatureSource>(
    config: &PipelineConfig,
    source: &S,
) -> Result<Estimate> {
    config.validate()?;
    let pois = PoiExtractor::new(config)
        .run(source, config.boundaries_path()?)
        .await?;
    ParkingEstimator::new(config).estimate(&pois, config.parking_path()?)
}
