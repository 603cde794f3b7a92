//! mfp-stitch - tiled micrograph export and translation stitching
//!
//! Exports acquisition tiles as 16-bit and intensity-windowed 8-bit
//! TIFFs, writes the ImageJ tile configuration from the stage positions,
//! and fuses the 8-bit tiles into one stitched image.

pub mod export;
pub mod stitcher;
pub mod tile;

pub use export::{export_tiles, ExportedTile, TILE_CONF_NAME};
pub use stitcher::stitch_directory;
pub use tile::{list_tiles, StitchError, Tile};
