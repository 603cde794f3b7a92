//! Estimated illumination correction matrix (EICM) command line tool

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use mfp_eicm::estimator;
use mfp_eicm::yokogawa;

#[derive(Parser, Debug)]
#[clap(name = "mfp-eicm")]
#[clap(about = "Illumination correction matrix estimation")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit an elliptical 2D Gaussian to the shading reference
    Gaussian {
        shading_reference: PathBuf,
    },
    /// Fit a 2D polynomial surface to the shading reference
    Polynomial {
        shading_reference: PathBuf,
        #[clap(long, default_value_t = 4)]
        degree: usize,
        #[clap(long, default_value_t = 4)]
        order: usize,
    },
    /// Median-filter the shading reference
    Median {
        shading_reference: PathBuf,
        #[clap(long, default_value_t = 3)]
        filter_size: usize,
    },
    /// Gaussian-blur the shading reference
    Blur {
        shading_reference: PathBuf,
        #[clap(long, default_value_t = 20.0)]
        sigma: f32,
    },
    /// Run every estimator on the shading reference
    All {
        shading_reference: PathBuf,
        #[clap(long, default_value_t = 4)]
        degree: usize,
        #[clap(long, default_value_t = 4)]
        order: usize,
        #[clap(long, default_value_t = 3)]
        filter_size: usize,
        #[clap(long, default_value_t = 20.0)]
        sigma: f32,
    },
    /// Build per-channel shading references from a plate directory
    ShadingReference {
        input_dir: PathBuf,
        #[clap(long)]
        z_plane: u32,
        #[clap(long)]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting mfp-eicm v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    match args.command {
        Command::Gaussian { shading_reference } => {
            estimator::run_gaussian(&shading_reference)?;
        }
        Command::Polynomial {
            shading_reference,
            degree,
            order,
        } => {
            estimator::run_polynomial(&shading_reference, degree, order)?;
        }
        Command::Median {
            shading_reference,
            filter_size,
        } => {
            estimator::run_median(&shading_reference, filter_size)?;
        }
        Command::Blur {
            shading_reference,
            sigma,
        } => {
            estimator::run_blur(&shading_reference, sigma)?;
        }
        Command::All {
            shading_reference,
            degree,
            order,
            filter_size,
            sigma,
        } => {
            estimator::run_gaussian(&shading_reference)?;
            estimator::run_polynomial(&shading_reference, degree, order)?;
            estimator::run_median(&shading_reference, filter_size)?;
            estimator::run_blur(&shading_reference, sigma)?;
        }
        Command::ShadingReference {
            input_dir,
            z_plane,
            output_dir,
        } => {
            let references =
                yokogawa::create_shading_reference(&input_dir, z_plane, &output_dir)?;
            info!("wrote {} shading reference(s)", references.len());
        }
    }
    Ok(())
}
