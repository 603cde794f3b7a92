//! Scientific TIFF I/O
//!
//! Images move through the pipelines as `ndarray::Array2` matrices plus a
//! small metadata record (physical resolution, axis tag). Float output is
//! written with deflate ("zlib") compression. An unreadable resolution or
//! description degrades to defaults with a logged warning instead of
//! failing the pipeline.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array2;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, compression::Deflate, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};
use tracing::warn;

use crate::{Error, Result};

/// Physical resolution and axis metadata carried beside the pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
    /// Pixels per centimeter along X.
    pub x_resolution: f64,
    /// Pixels per centimeter along Y.
    pub y_resolution: f64,
    /// Axis order tag, e.g. "YX". Empty when unknown.
    pub axes: String,
}

impl Default for ImageMeta {
    fn default() -> Self {
        Self {
            x_resolution: 1.0,
            y_resolution: 1.0,
            axes: String::new(),
        }
    }
}

impl ImageMeta {
    /// Metadata for a square pixel size given in micrometers.
    pub fn from_pixel_size_um(pixel_size: f64, axes: &str) -> Self {
        // 1e4 / px_size converts µm per pixel into pixels per cm.
        let per_cm = if pixel_size > 0.0 { 1e4 / pixel_size } else { 1.0 };
        Self {
            x_resolution: per_cm,
            y_resolution: per_cm,
            axes: axes.to_string(),
        }
    }
}

fn value_to_f64(value: Value) -> Option<f64> {
    match value {
        Value::Rational(n, d) if d != 0 => Some(n as f64 / d as f64),
        Value::Float(f) => Some(f as f64),
        Value::Double(d) => Some(d),
        Value::Unsigned(u) => Some(u as f64),
        _ => None,
    }
}

fn read_resolution(decoder: &mut Decoder<BufReader<File>>, tag: Tag) -> Option<f64> {
    decoder.find_tag(tag).ok().flatten().and_then(value_to_f64)
}

fn read_axes(decoder: &mut Decoder<BufReader<File>>) -> Option<String> {
    let value = decoder.find_tag(Tag::ImageDescription).ok().flatten()?;
    let description = match value {
        Value::Ascii(s) => s,
        _ => return None,
    };
    // The description is a small JSON object, e.g. {"axes": "YX", ...}.
    let parsed: serde_json::Value = serde_json::from_str(&description).ok()?;
    parsed
        .get("axes")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Read a single-page TIFF into a float matrix. Integer pixel types are
/// widened to f32.
pub fn read_f32(path: impl AsRef<Path>) -> Result<(Array2<f32>, ImageMeta)> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;

    let mut meta = ImageMeta::default();
    match (
        read_resolution(&mut decoder, Tag::XResolution),
        read_resolution(&mut decoder, Tag::YResolution),
    ) {
        (Some(x), Some(y)) => {
            meta.x_resolution = x;
            meta.y_resolution = y;
        }
        _ => warn!(
            "no resolution metadata in {}, assuming 1.0",
            path.display()
        ),
    }
    match read_axes(&mut decoder) {
        Some(axes) => meta.axes = axes,
        None => warn!("no axes metadata in {}, leaving empty", path.display()),
    }

    let data = decode_frame(&mut decoder, path)?;
    Ok((data, meta))
}

fn decode_frame(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<Array2<f32>> {
    let (width, height) = decoder.dimensions()?;
    let pixels: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(Error::Image(format!(
                "{}: unsupported sample format",
                path.display()
            )))
        }
    };
    Array2::from_shape_vec((height as usize, width as usize), pixels)
        .map_err(|e| Error::Image(format!("{}: {}", path.display(), e)))
}

/// Read every page of a TIFF as float frames.
pub fn read_f32_stack(path: impl AsRef<Path>) -> Result<Vec<Array2<f32>>> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());

    let mut frames = Vec::new();
    loop {
        frames.push(decode_frame(&mut decoder, path)?);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(frames)
}

fn rational(v: f64) -> Rational {
    Rational {
        n: (v * 1000.0).round() as u32,
        d: 1000,
    }
}

fn description_json(meta: &ImageMeta) -> Option<String> {
    if meta.axes.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "axes": meta.axes }).to_string())
    }
}

macro_rules! write_gray {
    ($fn_name:ident, $elem:ty, $colortype:ty) => {
        /// Write a single-page grayscale TIFF with deflate compression and
        /// resolution metadata.
        pub fn $fn_name(
            path: impl AsRef<Path>,
            data: &Array2<$elem>,
            meta: &ImageMeta,
        ) -> Result<()> {
            let path = path.as_ref();
            let (height, width) = data.dim();
            let file = File::create(path)?;
            let mut encoder = TiffEncoder::new(file)?;
            let mut image = encoder.new_image_with_compression::<$colortype, Deflate>(
                width as u32,
                height as u32,
                Deflate::default(),
            )?;
            image.resolution_unit(ResolutionUnit::Centimeter);
            image.x_resolution(rational(meta.x_resolution));
            image.y_resolution(rational(meta.y_resolution));
            if let Some(description) = description_json(meta) {
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description.as_str())?;
            }
            let buf: Vec<$elem> = data.iter().copied().collect();
            image.write_data(&buf)?;
            Ok(())
        }
    };
}

write_gray!(write_f32, f32, colortype::Gray32Float);
write_gray!(write_u16, u16, colortype::Gray16);
write_gray!(write_u8, u8, colortype::Gray8);

/// Write a stack of equally shaped float frames as a multi-page TIFF.
pub fn write_f32_stack(
    path: impl AsRef<Path>,
    frames: &[Array2<f32>],
    meta: &ImageMeta,
) -> Result<()> {
    let path = path.as_ref();
    if frames.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{}: empty image stack",
            path.display()
        )));
    }
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(file)?;
    for frame in frames {
        let (height, width) = frame.dim();
        let mut image = encoder.new_image_with_compression::<colortype::Gray32Float, Deflate>(
            width as u32,
            height as u32,
            Deflate::default(),
        )?;
        image.resolution_unit(ResolutionUnit::Centimeter);
        image.x_resolution(rational(meta.x_resolution));
        image.y_resolution(rational(meta.y_resolution));
        let buf: Vec<f32> = frame.iter().copied().collect();
        image.write_data(&buf)?;
    }
    Ok(())
}
