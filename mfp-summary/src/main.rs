//! mfp-summary - append flow-run summaries to the tracking base

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mfp_common::airtable::TableClient;
use mfp_common::config::IniConfig;
use mfp_summary::orchestrator::OrchestratorClient;
use mfp_summary::slurm::SlurmClient;
use mfp_summary::Aggregator;

#[derive(Parser, Debug)]
#[clap(name = "mfp-summary")]
#[clap(about = "Summarize finished flow runs into the tracking base")]
struct Args {
    /// INI file with tabular database credentials
    #[clap(long, value_name = "FILE")]
    airtable_config: PathBuf,

    /// Table receiving the summary rows
    #[clap(long, default_value = "flow-run-summary")]
    output_table_name: String,

    /// Table holding the log rows to process
    #[clap(long, default_value = "flow-run-log")]
    log_table_name: String,

    /// Orchestrator API base URL
    #[clap(long, env = "PREFECT_API_URL")]
    api_url: String,

    /// Orchestrator API key
    #[clap(long, env = "PREFECT_API_KEY")]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting mfp-summary v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = IniConfig::load(&args.airtable_config)?;
    let base = TableClient::from_config(&config)?;
    let log_table = base.for_table(&args.log_table_name);
    let summary_table = base.for_table(&args.output_table_name);

    let orchestrator = OrchestratorClient::new(&args.api_url, args.api_key.as_deref());
    let aggregator = Aggregator::new(log_table, summary_table, orchestrator, SlurmClient::default());

    let stats = aggregator.run().await?;
    info!(
        "done: {} record(s), {} summarized, {} already processed, {} pending, {} unknown",
        stats.records,
        stats.rows_created,
        stats.skipped_processed,
        stats.skipped_pending,
        stats.skipped_missing
    );
    Ok(())
}
