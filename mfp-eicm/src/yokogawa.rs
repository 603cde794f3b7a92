//! Shading reference creation from Yokogawa flat-field acquisitions
//!
//! A plate directory holds one TIFF per well/field/plane/channel, named
//! with the instrument's token convention (`...F001...Z033C01.tif`), plus
//! a measurement settings file describing acquisition date, pixel size
//! and the channel table. The reference for a channel is the per-pixel
//! median over all dark-subtracted fields at the selected Z plane.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use ndarray::Array2;
use tracing::{info, warn};

use mfp_common::provenance::ProvenanceNote;
use mfp_common::tiffio::{self, ImageMeta};
use mfp_common::Error;

use crate::estimator::EstimateError;

const SETTINGS_FILE: &str = "measurement_detail.ini";

/// Per-channel acquisition settings.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    /// Dark (camera background) image file in the plate directory.
    pub dark_image: Option<String>,
}

/// Acquisition metadata of one plate directory.
#[derive(Debug, Clone)]
pub struct PlateMetadata {
    pub acquisition_date: String,
    /// Pixel size in micrometers.
    pub pixel_size: f64,
    pub pixel_size_unit: String,
    /// Channel number ("01") to settings.
    pub channels: BTreeMap<String, ChannelInfo>,
}

/// Read the measurement settings file of a plate directory.
pub fn read_metadata(input_dir: &Path) -> Result<PlateMetadata, EstimateError> {
    let path = input_dir.join(SETTINGS_FILE);
    let ini = Ini::load_from_file(&path).map_err(|e| {
        EstimateError::Common(Error::Config(format!(
            "cannot read {}: {}",
            path.display(),
            e
        )))
    })?;

    let default = |key: &str| ini.get_from(Some("DEFAULT"), key).map(str::to_string);
    let acquisition_date = default("acquisition_date").ok_or_else(|| {
        EstimateError::Common(Error::Config(format!(
            "missing key 'acquisition_date' in {}",
            path.display()
        )))
    })?;

    let pixel_size = match default("pixel_size").map(|v| v.parse::<f64>()) {
        Some(Ok(size)) if size > 0.0 => size,
        _ => {
            warn!("unreadable pixel size in {}, assuming 1.0", path.display());
            1.0
        }
    };
    let pixel_size_unit = default("pixel_size_unit").unwrap_or_else(|| {
        warn!("no pixel size unit in {}, assuming um", path.display());
        "um".to_string()
    });

    let mut channels = BTreeMap::new();
    for (section, properties) in ini.iter() {
        let Some(section) = section else { continue };
        let Some(number) = section.strip_prefix("CH") else {
            continue;
        };
        channels.insert(
            number.to_string(),
            ChannelInfo {
                name: properties
                    .get("name")
                    .unwrap_or(section)
                    .to_string(),
                dark_image: properties.get("dark_image").map(str::to_string),
            },
        );
    }
    if channels.is_empty() {
        return Err(EstimateError::Common(Error::Config(format!(
            "no channel sections in {}",
            path.display()
        ))));
    }

    Ok(PlateMetadata {
        acquisition_date,
        pixel_size,
        pixel_size_unit,
        channels,
    })
}

/// Field/plane/channel indices parsed from an acquisition file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIndex {
    pub field: u32,
    pub z_plane: u32,
    pub channel: String,
}

/// Parse the trailing token block of an acquisition file name, e.g.
/// `plate_A01_T0001F012L01A01Z033C02.tif`.
pub fn parse_tile_index(file_name: &str) -> Option<TileIndex> {
    let stem = file_name.strip_suffix(".tif")?;
    let tokens = stem.rsplit('_').next()?;

    let mut field = None;
    let mut z_plane = None;
    let mut channel = None;
    let bytes = tokens.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let letter = bytes[i] as char;
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end == start {
            return None;
        }
        let digits = &tokens[start..end];
        match letter {
            'F' => field = digits.parse().ok(),
            'Z' => z_plane = digits.parse().ok(),
            'C' => channel = Some(digits.to_string()),
            _ => {}
        }
        i = end;
    }
    Some(TileIndex {
        field: field?,
        z_plane: z_plane?,
        channel: channel?,
    })
}

fn median_projection(stack: &[Array2<f32>]) -> Array2<f32> {
    let shape = stack[0].dim();
    let mut values = Vec::with_capacity(stack.len());
    Array2::from_shape_fn(shape, |(y, x)| {
        values.clear();
        values.extend(stack.iter().map(|frame| frame[[y, x]]));
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = values.len();
        if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        }
    })
}

/// Create one shading reference per channel from the plate directory.
/// References land under `output_dir/<acquisition date>/`.
pub fn create_shading_reference(
    input_dir: &Path,
    z_plane: u32,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, EstimateError> {
    let metadata = read_metadata(input_dir)?;
    let plate_name = input_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let pattern = input_dir.join(format!("{}*.tif", plate_name));
    let files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| EstimateError::Common(Error::InvalidInput(e.to_string())))?
        .filter_map(|entry| entry.ok())
        .collect();

    // Group fields of the selected plane by channel.
    let mut stacks: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in &files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = parse_tile_index(name) else {
            continue;
        };
        if index.z_plane == z_plane {
            stacks.entry(index.channel).or_default().push(file.clone());
        }
    }
    if stacks.is_empty() {
        return Err(EstimateError::Common(Error::NotFound(format!(
            "no acquisition files for z plane {} in {}",
            z_plane,
            input_dir.display()
        ))));
    }

    let final_out_dir = output_dir.join(&metadata.acquisition_date);
    std::fs::create_dir_all(&final_out_dir).map_err(Error::Io)?;

    let meta = ImageMeta::from_pixel_size_um(metadata.pixel_size, "YX");
    let mut references = Vec::new();
    for (channel_number, field_files) in &stacks {
        let channel = metadata.channels.get(channel_number).ok_or_else(|| {
            EstimateError::Common(Error::Config(format!(
                "channel {} not present in {}",
                channel_number, SETTINGS_FILE
            )))
        })?;

        let dark = match &channel.dark_image {
            Some(name) => Some(tiffio::read_f32(input_dir.join(name))?.0),
            None => None,
        };

        let mut stack = Vec::with_capacity(field_files.len());
        for file in field_files {
            let (mut frame, _) = tiffio::read_f32(file)?;
            if let Some(dark) = &dark {
                frame.zip_mut_with(dark, |v, d| *v = (*v - d).max(0.0));
            }
            stack.push(frame);
        }
        info!(
            "channel {}: median projection over {} field(s)",
            channel.name,
            stack.len()
        );

        let projection = median_projection(&stack);
        let out_path = final_out_dir.join(format!(
            "{}_{}_shading-reference.tif",
            metadata.acquisition_date, channel.name
        ));
        tiffio::write_f32(&out_path, &projection, &meta)?;
        ProvenanceNote::new(
            "Shading Reference",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )
        .summary(
            "Median projection over dark-subtracted flat-field acquisitions of one channel.",
        )
        .parameter("input_dir", input_dir.display())
        .parameter("z_plane", z_plane)
        .parameter("channel", &channel.name)
        .parameter("fields", stack.len())
        .write_beside(&out_path)?;
        references.push(out_path);
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_acquisition_file_names() {
        let index =
            parse_tile_index("plate_A01_T0001F012L01A01Z033C02.tif").unwrap();
        assert_eq!(
            index,
            TileIndex {
                field: 12,
                z_plane: 33,
                channel: "02".to_string()
            }
        );
        assert!(parse_tile_index("notes.txt").is_none());
        assert!(parse_tile_index("plate_A01_T0001F001.tif").is_none());
    }

    #[test]
    fn median_projection_is_per_pixel() {
        let stack = vec![
            Array2::from_elem((2, 2), 1.0f32),
            Array2::from_elem((2, 2), 9.0f32),
            Array2::from_elem((2, 2), 2.0f32),
        ];
        let projection = median_projection(&stack);
        assert_eq!(projection[[0, 0]], 2.0);
    }

    #[test]
    fn builds_reference_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let plate = dir.path().join("FlatField_20221221");
        std::fs::create_dir_all(&plate).unwrap();

        std::fs::write(
            plate.join(SETTINGS_FILE),
            "[DEFAULT]\nacquisition_date = 20221221\npixel_size = 0.65\npixel_size_unit = um\n\n[CH01]\nname = DAPI\ndark_image = dark_01.tif\n",
        )
        .unwrap();

        let meta = ImageMeta::default();
        let dark = Array2::from_elem((8, 8), 10.0f32);
        tiffio::write_f32(plate.join("dark_01.tif"), &dark, &meta).unwrap();
        for (field, level) in [(1u32, 100.0f32), (2, 200.0), (3, 300.0)] {
            let frame = Array2::from_elem((8, 8), level);
            let name = format!(
                "FlatField_20221221_A01_T0001F{:03}L01A01Z033C01.tif",
                field
            );
            tiffio::write_f32(plate.join(name), &frame, &meta).unwrap();
        }

        let out = dir.path().join("out");
        let references = create_shading_reference(&plate, 33, &out).unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(
            references[0],
            out.join("20221221").join("20221221_DAPI_shading-reference.tif")
        );

        // Median of dark-subtracted levels: 200 - 10.
        let (projection, meta) = tiffio::read_f32(&references[0]).unwrap();
        assert_eq!(projection[[4, 4]], 190.0);
        assert!((meta.x_resolution - 1e4 / 0.65).abs() < 0.01);
    }
}
