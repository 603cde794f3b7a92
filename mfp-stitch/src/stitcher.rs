//! Translation stitching
//!
//! Places each tile at its configured pixel offset on a common canvas.
//! Offsets are shifted so the top-left tile lands at the origin, and
//! overlapping pixels are fused by averaging.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use mfp_common::tiffio::{self, ImageMeta};
use mfp_common::Error;

use crate::export::{parse_tile_configuration, ExportedTile};
use crate::tile::StitchError;

pub const STITCHED_NAME: &str = "stitched.tif";

/// Fuse tiles at integer translations into one image.
pub fn stitch_translation(
    tiles: &[(Array2<f32>, (f64, f64))],
) -> Result<Array2<f32>, StitchError> {
    if tiles.is_empty() {
        return Err(StitchError::TileConfiguration("no tiles to stitch".into()));
    }

    let min_x = tiles
        .iter()
        .map(|(_, p)| p.0)
        .fold(f64::INFINITY, f64::min);
    let min_y = tiles
        .iter()
        .map(|(_, p)| p.1)
        .fold(f64::INFINITY, f64::min);

    let mut width = 0usize;
    let mut height = 0usize;
    let offsets: Vec<(usize, usize)> = tiles
        .iter()
        .map(|(image, (x, y))| {
            let ox = (x - min_x).round() as usize;
            let oy = (y - min_y).round() as usize;
            let (h, w) = image.dim();
            width = width.max(ox + w);
            height = height.max(oy + h);
            (ox, oy)
        })
        .collect();

    let mut sum = Array2::<f32>::zeros((height, width));
    let mut count = Array2::<u32>::zeros((height, width));
    for ((image, _), (ox, oy)) in tiles.iter().zip(&offsets) {
        for ((y, x), &value) in image.indexed_iter() {
            sum[[oy + y, ox + x]] += value;
            count[[oy + y, ox + x]] += 1;
        }
    }
    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        let n = count[[y, x]];
        if n == 0 {
            0.0
        } else {
            sum[[y, x]] / n as f32
        }
    }))
}

/// Stitch the tiles listed in a directory's tile configuration and write
/// the fused 8-bit result into the same directory.
pub fn stitch_directory(
    input_dir: &Path,
    tileconf_filename: &str,
) -> Result<PathBuf, StitchError> {
    let conf_path = input_dir.join(tileconf_filename);
    let text = std::fs::read_to_string(&conf_path).map_err(Error::Io)?;
    let entries: Vec<ExportedTile> = parse_tile_configuration(&text)?;

    let mut tiles = Vec::with_capacity(entries.len());
    let mut meta = ImageMeta::default();
    for entry in &entries {
        let (image, image_meta) = tiffio::read_f32(input_dir.join(&entry.file_name))?;
        meta = image_meta;
        tiles.push((image, entry.position));
    }
    info!("stitching {} tile(s)", tiles.len());

    let fused = stitch_translation(&tiles)?;
    let result = fused.mapv(|v| v.clamp(0.0, u8::MAX as f32).round() as u8);
    let out_path = input_dir.join(STITCHED_NAME);
    tiffio::write_u8(&out_path, &result, &meta)?;
    info!("wrote {}", out_path.display());
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_by_side_tiles_form_one_canvas() {
        let left = Array2::from_elem((4, 4), 10.0f32);
        let right = Array2::from_elem((4, 4), 30.0f32);
        let fused =
            stitch_translation(&[(left, (0.0, 0.0)), (right, (4.0, 0.0))]).unwrap();
        assert_eq!(fused.dim(), (4, 8));
        assert_eq!(fused[[0, 0]], 10.0);
        assert_eq!(fused[[0, 7]], 30.0);
    }

    #[test]
    fn overlap_is_averaged() {
        let a = Array2::from_elem((2, 4), 10.0f32);
        let b = Array2::from_elem((2, 4), 30.0f32);
        let fused = stitch_translation(&[(a, (0.0, 0.0)), (b, (2.0, 0.0))]).unwrap();
        assert_eq!(fused.dim(), (2, 6));
        assert_eq!(fused[[0, 0]], 10.0);
        assert_eq!(fused[[0, 3]], 20.0);
        assert_eq!(fused[[0, 5]], 30.0);
    }

    #[test]
    fn negative_positions_are_shifted_to_origin() {
        let a = Array2::from_elem((2, 2), 5.0f32);
        let b = Array2::from_elem((2, 2), 7.0f32);
        let fused =
            stitch_translation(&[(a, (-10.0, -10.0)), (b, (-8.0, -10.0))]).unwrap();
        assert_eq!(fused.dim(), (2, 4));
        assert_eq!(fused[[0, 0]], 5.0);
        assert_eq!(fused[[0, 3]], 7.0);
    }

    #[test]
    fn empty_tile_set_is_an_error() {
        assert!(stitch_translation(&[]).is_err());
    }
}
