//! Tile export
//!
//! Each tile is written twice: the raw values as 16-bit into `16bit/`,
//! and an intensity-windowed rescale as 8-bit into `8bit/` for the
//! stitcher. Both directories receive a `TileConfiguration.txt` in the
//! ImageJ grid/collection format listing the tile positions in pixels.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use mfp_common::tiffio::{self, ImageMeta};

use crate::tile::{StitchError, Tile};

pub const TILE_CONF_NAME: &str = "TileConfiguration.txt";

const EXPORT_PREFIXES: [&str; 2] = ["16bit", "8bit"];

/// Name and position of one exported tile, as listed in the tile
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedTile {
    pub file_name: String,
    pub position: (f64, f64),
}

fn to_u16(image: &Array2<f32>) -> Array2<u16> {
    image.mapv(|v| v.clamp(0.0, u16::MAX as f32).round() as u16)
}

/// Rescale into 8 bits over a window of the given width centered on the
/// mean intensity.
fn window_to_u8(image: &Array2<f32>, intensity_range: f32) -> Array2<u8> {
    let mean = image.mean().unwrap_or(0.0);
    let low = mean - intensity_range / 2.0;
    let range = intensity_range.max(f32::EPSILON);
    image.mapv(|v| (((v - low) / range) * 255.0).clamp(0.0, 255.0).round() as u8)
}

/// Render the ImageJ grid/collection tile configuration.
pub fn render_tile_configuration(tiles: &[ExportedTile]) -> String {
    let mut text = String::from("# Define the number of dimensions we are working on\ndim = 2\n\n# Define the image coordinates\n");
    for tile in tiles {
        text.push_str(&format!(
            "{}; ; ({:.1}, {:.1})\n",
            tile.file_name, tile.position.0, tile.position.1
        ));
    }
    text
}

/// Parse a tile configuration back into names and positions.
pub fn parse_tile_configuration(text: &str) -> Result<Vec<ExportedTile>, StitchError> {
    let mut tiles = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("dim") {
            continue;
        }
        let mut parts = line.split(';');
        let file_name = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StitchError::TileConfiguration(format!("bad line '{}'", line)))?;
        let coords = parts
            .nth(1)
            .map(|s| s.trim().trim_start_matches('(').trim_end_matches(')'))
            .ok_or_else(|| StitchError::TileConfiguration(format!("bad line '{}'", line)))?;
        let mut values = coords.split(',').map(|v| v.trim().parse::<f64>());
        let (x, y) = match (values.next(), values.next()) {
            (Some(Ok(x)), Some(Ok(y))) => (x, y),
            _ => {
                return Err(StitchError::TileConfiguration(format!(
                    "bad coordinates in '{}'",
                    line
                )))
            }
        };
        tiles.push(ExportedTile {
            file_name: file_name.to_string(),
            position: (x, y),
        });
    }
    Ok(tiles)
}

/// Export every tile and write the tile configurations. Returns the list
/// of exported tiles in input order.
pub fn export_tiles(
    tile_paths: &[PathBuf],
    save_dir: &Path,
    intensity_range: f32,
) -> Result<Vec<ExportedTile>, StitchError> {
    for prefix in EXPORT_PREFIXES {
        std::fs::create_dir_all(save_dir.join(prefix)).map_err(mfp_common::Error::Io)?;
    }

    let mut exported = Vec::with_capacity(tile_paths.len());
    for path in tile_paths {
        let tile = Tile::load(path)?;
        let file_name = format!("{}.tif", tile.basename());
        let meta = ImageMeta::from_pixel_size_um(tile.pixel_size_um, "YX");

        tiffio::write_u16(
            save_dir.join("16bit").join(&file_name),
            &to_u16(&tile.image),
            &meta,
        )?;
        tiffio::write_u8(
            save_dir.join("8bit").join(&file_name),
            &window_to_u8(&tile.image, intensity_range),
            &meta,
        )?;
        info!("exported {}", file_name);

        exported.push(ExportedTile {
            file_name,
            position: tile.position,
        });
    }

    let configuration = render_tile_configuration(&exported);
    for prefix in EXPORT_PREFIXES {
        std::fs::write(save_dir.join(prefix).join(TILE_CONF_NAME), &configuration)
            .map_err(mfp_common::Error::Io)?;
    }
    Ok(exported)
}
