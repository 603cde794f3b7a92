//! Estimator harness
//!
//! Every estimator follows the same contract: load the shading reference
//! with its metadata, compute a correction matrix of identical shape,
//! normalize it to a maximum of 1.0, write it as float32 beside the input
//! with a derived suffix, and drop a provenance note. Fit quality is not
//! validated; a degenerate fit propagates into the written matrix.

pub mod blur;
pub mod gaussian;
pub mod median;
pub mod polynomial;

use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use tracing::info;

use mfp_common::matrix::normalize_matrix;
use mfp_common::provenance::ProvenanceNote;
use mfp_common::tiffio::{self, ImageMeta};

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error(transparent)]
    Common(#[from] mfp_common::Error),

    /// The numeric routine could not produce a solution.
    #[error("fit failed: {0}")]
    Fit(String),
}

/// Paths produced by one estimator invocation.
#[derive(Debug, Clone)]
pub struct EstimatorOutput {
    pub matrix_path: PathBuf,
    pub note_path: PathBuf,
}

fn derived_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tif".to_string());
    input.with_file_name(format!("{}_{}.{}", stem, suffix, ext))
}

fn note(title: &str) -> ProvenanceNote {
    ProvenanceNote::new(title, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn write_matrix(
    input: &Path,
    suffix: &str,
    matrix: &Array2<f32>,
    meta: &ImageMeta,
) -> Result<PathBuf, EstimateError> {
    let normalized = normalize_matrix(matrix)?;
    let path = derived_path(input, suffix);
    tiffio::write_f32(&path, &normalized, meta)?;
    info!("wrote {}", path.display());
    Ok(path)
}

/// Gaussian-fit estimator.
pub fn run_gaussian(shading_reference: &Path) -> Result<EstimatorOutput, EstimateError> {
    let (data, meta) = tiffio::read_f32(shading_reference)?;
    let fit = gaussian::fit_gaussian_2d(&data)?;
    info!(
        "gaussian fit: amplitude {:.3}, center ({:.1}, {:.1}), sigma ({:.1}, {:.1})",
        fit.amplitude, fit.center.0, fit.center.1, fit.sigma.0, fit.sigma.1
    );
    let matrix = fit.fitted_matrix(data.dim());
    let matrix_path = write_matrix(shading_reference, "eicm-fit", &matrix, &meta)?;

    let note_path = note("EICM with Gaussian Fit")
        .summary("The computed illumination matrix is the best 2D Gaussian fit to the provided shading reference.")
        .parameter("shading_reference", shading_reference.display())
        .section("Fit", &fit.describe())
        .write_beside(&matrix_path)?;
    Ok(EstimatorOutput {
        matrix_path,
        note_path,
    })
}

/// Polynomial-surface estimator.
pub fn run_polynomial(
    shading_reference: &Path,
    polynomial_degree: usize,
    order: usize,
) -> Result<EstimatorOutput, EstimateError> {
    let (data, meta) = tiffio::read_f32(shading_reference)?;
    let fit = polynomial::polynomial_fit(&data, polynomial_degree, order)?;
    let matrix_path = write_matrix(shading_reference, "poly-fit", &fit.surface, &meta)?;

    let note_path = note("EICM with Polynomial Fit")
        .summary("The computed illumination matrix is the best polynomial fit to the provided shading reference.")
        .parameter("shading_reference", shading_reference.display())
        .parameter("polynomial_degree", polynomial_degree)
        .parameter("order", order)
        .section("Fit", &fit.describe())
        .write_beside(&matrix_path)?;
    Ok(EstimatorOutput {
        matrix_path,
        note_path,
    })
}

/// Median-filter estimator.
pub fn run_median(
    shading_reference: &Path,
    filter_size: usize,
) -> Result<EstimatorOutput, EstimateError> {
    let (data, meta) = tiffio::read_f32(shading_reference)?;
    let filtered = median::median_filter(&data, filter_size);
    let matrix_path = write_matrix(shading_reference, "median-filtered", &filtered, &meta)?;

    let note_path = note("EICM with Median Filter")
        .summary("The computed illumination matrix is the normalized (to max) median filtered shading reference.")
        .parameter("shading_reference", shading_reference.display())
        .parameter("filter_size", filter_size)
        .write_beside(&matrix_path)?;
    Ok(EstimatorOutput {
        matrix_path,
        note_path,
    })
}

/// Gaussian-blur estimator.
pub fn run_blur(
    shading_reference: &Path,
    sigma: f32,
) -> Result<EstimatorOutput, EstimateError> {
    let (data, meta) = tiffio::read_f32(shading_reference)?;
    let blurred = blur::gaussian_blur(&data, sigma);
    let matrix_path = write_matrix(shading_reference, "eicm-blur", &blurred, &meta)?;

    let note_path = note("EICM with Gaussian Blur")
        .summary("The computed illumination matrix is the normalized (to max) Gaussian blurred shading reference.")
        .parameter("shading_reference", shading_reference.display())
        .parameter("sigma", sigma)
        .write_beside(&matrix_path)?;
    Ok(EstimatorOutput {
        matrix_path,
        note_path,
    })
}
