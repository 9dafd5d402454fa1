//! order-etl: WooCommerce order extraction
//!
//! Pulls orders modified since the last run, normalizes them into one row
//! per order and upserts them into the configured table.
//!
//! ## Configuration
//! - ORDER_ETL_CONFIG: optional YAML file
//! - ORDER_ETL__SECTION__KEY: overrides (e.g. ORDER_ETL__SOURCE__BASE_URL)
//! - WOOCOMMERCE_CONSUMER_KEY / WOOCOMMERCE_CONSUMER_SECRET, DATABASE_URL or DB_*
//! - ORDER_ETL_LOG: log filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use order_etl::checkpoint::SystemClock;
use order_etl::config::Config;
use order_etl::pipeline::{Pipeline, PipelineError};
use order_etl::storage;
use order_etl::utils::bootstrap::init_tracing;
use order_etl::utils::retry::TokioSleeper;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "Pipeline failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run() -> Result<(), PipelineError> {
    let config = Config::load()?;
    config.validate()?;

    let sink = storage::connect(&config.storage)
        .await
        .map_err(PipelineError::Connect)?;

    let pipeline = Pipeline::from_config(
        &config,
        sink,
        Arc::new(TokioSleeper),
        Arc::new(SystemClock),
    )?;

    let report = pipeline.run().await?;
    info!(
        upserted = report.upserted,
        complete = report.extraction_complete(),
        "order-etl finished"
    );
    Ok(())
}
