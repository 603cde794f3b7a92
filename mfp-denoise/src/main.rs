//! mfp-denoise - prepare train/validation patches for denoising

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mfp_denoise::{prepare_train_data, DataPrepParams};

#[derive(Parser, Debug)]
#[clap(name = "mfp-denoise")]
#[clap(about = "Generate denoise training data from acquired stacks")]
struct Args {
    /// Directory holding the acquired stacks
    #[clap(long)]
    data_dir: PathBuf,

    /// Stack file name filter
    #[clap(long, default_value = "*.tif")]
    filter: String,

    /// Patch edge length in pixels (square patches)
    #[clap(long, default_value_t = 96)]
    patch_size: usize,

    /// Random patches extracted per frame
    #[clap(long, default_value_t = 8)]
    num_patches_per_img: usize,

    /// Root of the training-data tree
    #[clap(long)]
    save_data_path: PathBuf,

    /// File name prefix of the patch stacks
    #[clap(long, default_value = "prefix")]
    prefix: String,

    /// Facility group owning the run
    #[clap(long)]
    group: String,

    /// User owning the run
    #[clap(long)]
    user: String,

    /// Run name
    #[clap(long)]
    name: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting mfp-denoise v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let params = DataPrepParams {
        data_dir: args.data_dir,
        filter: args.filter,
        patch_shape: (args.patch_size, args.patch_size),
        num_patches_per_img: args.num_patches_per_img,
        save_data_path: args.save_data_path,
        prefix: args.prefix,
        group: args.group,
        user: args.user,
        name: args.name,
    };

    let output = prepare_train_data(&params)?;
    info!(
        "done: {} train / {} validation patch(es) in {}",
        output.train_patches,
        output.val_patches,
        output.output_dir.display()
    );
    Ok(())
}
