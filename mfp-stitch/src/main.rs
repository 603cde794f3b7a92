//! mfp-stitch - export tiled micrographs and stitch them by translation

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mfp_stitch::{export_tiles, list_tiles, stitch_directory, TILE_CONF_NAME};

#[derive(Parser, Debug)]
#[clap(name = "mfp-stitch")]
#[clap(about = "Export acquisition tiles and stitch them into one image")]
struct Args {
    /// Directory holding the acquisition tiles
    #[clap(long)]
    input_dir: PathBuf,

    /// Tile file name filter
    #[clap(long, default_value = "*.tif")]
    filename_filter: String,

    /// Output directory for the 16bit/ and 8bit/ exports
    #[clap(long)]
    save_dir: PathBuf,

    /// Intensity window width for the 8-bit export
    #[clap(long, default_value_t = 1000.0)]
    intensity_range: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting mfp-stitch v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let tiles = list_tiles(&args.input_dir, &args.filename_filter)?;
    info!("found {} tile(s)", tiles.len());

    let exported = export_tiles(&tiles, &args.save_dir, args.intensity_range)?;
    info!("exported {} tile(s)", exported.len());

    let stitched = stitch_directory(&args.save_dir.join("8bit"), TILE_CONF_NAME)?;
    info!("done: {}", stitched.display());
    Ok(())
}
