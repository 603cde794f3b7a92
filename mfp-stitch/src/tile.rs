//! Tile loading
//!
//! A tile is a TIFF image next to a JSON sidecar recording the stage
//! position and pixel size of the acquisition, both in meters. Stage
//! positions are converted to pixel coordinates for the tile
//! configuration.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Deserialize;
use thiserror::Error;

use mfp_common::tiffio;
use mfp_common::Error;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error(transparent)]
    Common(#[from] mfp_common::Error),

    #[error("tile {0} has no position sidecar")]
    MissingSidecar(PathBuf),

    #[error("tile configuration: {0}")]
    TileConfiguration(String),
}

#[derive(Debug, Deserialize)]
struct Sidecar {
    /// Stage position (x, y) in meters.
    stage_position: (f64, f64),
    /// Pixel size in meters.
    pixel_size: f64,
}

/// One loaded acquisition tile.
#[derive(Debug)]
pub struct Tile {
    pub path: PathBuf,
    pub image: Array2<f32>,
    /// Stage position in pixel coordinates (x, y).
    pub position: (f64, f64),
    /// Pixel size in micrometers.
    pub pixel_size_um: f64,
}

impl Tile {
    pub fn basename(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Load the image and its position sidecar.
    pub fn load(path: &Path) -> Result<Self, StitchError> {
        let sidecar_path = path.with_extension("json");
        let text = std::fs::read_to_string(&sidecar_path)
            .map_err(|_| StitchError::MissingSidecar(path.to_path_buf()))?;
        let sidecar: Sidecar = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", sidecar_path.display(), e)))?;
        if sidecar.pixel_size <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "{}: non-positive pixel size",
                sidecar_path.display()
            ))
            .into());
        }

        let (image, _) = tiffio::read_f32(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            image,
            position: (
                sidecar.stage_position.0 / sidecar.pixel_size,
                sidecar.stage_position.1 / sidecar.pixel_size,
            ),
            pixel_size_um: sidecar.pixel_size * 1e6,
        })
    }
}

/// Enumerate tiles in a directory by file name filter, sorted by name.
pub fn list_tiles(input_dir: &Path, filename_filter: &str) -> Result<Vec<PathBuf>, StitchError> {
    let pattern = input_dir.join(filename_filter);
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| Error::InvalidInput(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}
