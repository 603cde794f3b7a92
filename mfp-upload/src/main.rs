//! mfp-upload - PSF measurement upload pipeline
//!
//! Pushes exported PSF analysis CSVs and their bead images into the
//! facility's measurement table, staging images on the hosting service
//! until the table has fetched them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mfp_common::airtable::TableClient;
use mfp_common::config::IniConfig;
use mfp_upload::services::imagehost::ImageHostClient;
use mfp_upload::{UploadPipeline, UploadSettings};

#[derive(Parser, Debug)]
#[clap(name = "mfp-upload")]
#[clap(about = "Upload PSF measurement CSVs and images to the measurement table")]
struct Args {
    /// INI file with tabular database credentials and directories
    #[clap(long, value_name = "FILE")]
    airtable_config: PathBuf,

    /// INI file with image hosting credentials
    #[clap(long, value_name = "FILE")]
    cloudinary_config: PathBuf,

    /// Seconds between thumbnail polls
    #[clap(long, default_value = "1")]
    poll_interval: u64,

    /// Maximum thumbnail polls per record before failing
    #[clap(long, default_value = "300")]
    poll_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting mfp-upload v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let table_config = IniConfig::load(&args.airtable_config)?;
    let host_config = IniConfig::load(&args.cloudinary_config)?;

    let table = TableClient::from_config(&table_config)?;
    let host = ImageHostClient::from_config(&host_config)?;

    let mut settings = UploadSettings::new(
        table_config.path("upload_dir")?,
        table_config.path("uploaded_dir")?,
    );
    settings.poll_interval = Duration::from_secs(args.poll_interval);
    settings.poll_attempts = args.poll_attempts;

    let pipeline = UploadPipeline::new(table, host, settings);
    let stats = pipeline.run().await?;

    info!(
        "done: {} file(s), {} row(s) created, {} skipped",
        stats.files, stats.rows_created, stats.rows_skipped
    );
    Ok(())
}
