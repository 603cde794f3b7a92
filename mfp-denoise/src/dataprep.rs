//! Train/validation patch generation
//!
//! Stacks from the data directory are split into 2D frames, shuffled
//! with a fixed seed so reruns produce the same split, and sampled into
//! random patches per frame. Roughly one frame in ten (at least one) is
//! reserved for validation.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::info;

use mfp_common::provenance::ProvenanceNote;
use mfp_common::tiffio::{self, ImageMeta};
use mfp_common::Error;

const SHUFFLE_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum DataPrepError {
    #[error(transparent)]
    Common(#[from] mfp_common::Error),

    #[error("at least two frames are required for training, found {0}")]
    NotEnoughFrames(usize),

    #[error("patch shape {patch:?} does not fit into frame {frame:?}")]
    PatchTooLarge {
        patch: (usize, usize),
        frame: (usize, usize),
    },
}

/// Parameters of one data-preparation run.
#[derive(Debug, Clone)]
pub struct DataPrepParams {
    pub data_dir: PathBuf,
    pub filter: String,
    pub patch_shape: (usize, usize),
    pub num_patches_per_img: usize,
    pub save_data_path: PathBuf,
    pub prefix: String,
    pub group: String,
    pub user: String,
    pub name: String,
}

/// Written patch stacks.
#[derive(Debug, Clone)]
pub struct DataPrepOutput {
    pub output_dir: PathBuf,
    pub train_path: PathBuf,
    pub val_path: PathBuf,
    pub train_patches: usize,
    pub val_patches: usize,
}

/// Load every matching stack and split it into 2D frames.
pub fn load_frames(data_dir: &Path, filter: &str) -> Result<Vec<Array2<f32>>, DataPrepError> {
    let pattern = data_dir.join(filter);
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| Error::InvalidInput(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();

    let mut frames = Vec::new();
    for file in &files {
        let stack = tiffio::read_f32_stack(file)?;
        info!("loaded {} with {} frame(s)", file.display(), stack.len());
        frames.extend(stack);
    }
    Ok(frames)
}

fn sample_patches(
    frame: &Array2<f32>,
    patch_shape: (usize, usize),
    count: usize,
    rng: &mut StdRng,
) -> Result<Vec<Array2<f32>>, DataPrepError> {
    let (fh, fw) = frame.dim();
    let (ph, pw) = patch_shape;
    if ph > fh || pw > fw {
        return Err(DataPrepError::PatchTooLarge {
            patch: patch_shape,
            frame: (fh, fw),
        });
    }
    let mut patches = Vec::with_capacity(count);
    for _ in 0..count {
        let y = rng.gen_range(0..=fh - ph);
        let x = rng.gen_range(0..=fw - pw);
        patches.push(
            frame
                .slice(ndarray::s![y..y + ph, x..x + pw])
                .to_owned(),
        );
    }
    Ok(patches)
}

/// Prepare shuffled train/validation patch stacks under
/// `<save_data_path>/<group>/<user>/<name>`.
pub fn prepare_train_data(params: &DataPrepParams) -> Result<DataPrepOutput, DataPrepError> {
    let mut frames = load_frames(&params.data_dir, &params.filter)?;
    if frames.len() < 2 {
        return Err(DataPrepError::NotEnoughFrames(frames.len()));
    }

    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    frames.shuffle(&mut rng);

    // One frame in ten goes to validation, at least one.
    let n_val = (frames.len() / 10).max(1);
    let (val_frames, train_frames) = frames.split_at(n_val);

    let mut train = Vec::new();
    for frame in train_frames {
        train.extend(sample_patches(
            frame,
            params.patch_shape,
            params.num_patches_per_img,
            &mut rng,
        )?);
    }
    let mut val = Vec::new();
    for frame in val_frames {
        val.extend(sample_patches(
            frame,
            params.patch_shape,
            params.num_patches_per_img,
            &mut rng,
        )?);
    }
    info!(
        "extracted {} train and {} validation patch(es)",
        train.len(),
        val.len()
    );

    let output_dir = params
        .save_data_path
        .join(&params.group)
        .join(&params.user)
        .join(&params.name);
    std::fs::create_dir_all(&output_dir).map_err(Error::Io)?;

    let meta = ImageMeta::default();
    let train_path = output_dir.join(format!("{}_train.tif", params.prefix));
    let val_path = output_dir.join(format!("{}_val.tif", params.prefix));
    tiffio::write_f32_stack(&train_path, &train, &meta)?;
    tiffio::write_f32_stack(&val_path, &val, &meta)?;

    ProvenanceNote::new(
        "Denoise Training Data",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
    .summary("Shuffled train/validation patches extracted from the acquired stacks.")
    .parameter("data_dir", params.data_dir.display())
    .parameter("filter", &params.filter)
    .parameter(
        "patch_shape",
        format!("{}x{}", params.patch_shape.0, params.patch_shape.1),
    )
    .parameter("num_patches_per_img", params.num_patches_per_img)
    .parameter("train_patches", train.len())
    .parameter("val_patches", val.len())
    .write_beside(&train_path)?;

    Ok(DataPrepOutput {
        output_dir,
        train_path,
        val_path,
        train_patches: train.len(),
        val_patches: val.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stack(dir: &Path, name: &str, frames: usize) {
        let stack: Vec<Array2<f32>> = (0..frames)
            .map(|i| Array2::from_shape_fn((32, 32), |(y, x)| (i * 1024 + y * 32 + x) as f32))
            .collect();
        tiffio::write_f32_stack(dir.join(name), &stack, &ImageMeta::default()).unwrap();
    }

    fn params(data_dir: &Path, save_dir: &Path) -> DataPrepParams {
        DataPrepParams {
            data_dir: data_dir.to_path_buf(),
            filter: "*.tif".to_string(),
            patch_shape: (8, 8),
            num_patches_per_img: 4,
            save_data_path: save_dir.to_path_buf(),
            prefix: "run1".to_string(),
            group: "gmicro".to_string(),
            user: "someone".to_string(),
            name: "plate-denoise".to_string(),
        }
    }

    #[test]
    fn writes_patch_stacks_under_nested_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_stack(&data_dir, "movie_a.tif", 6);
        write_stack(&data_dir, "movie_b.tif", 6);

        let output = prepare_train_data(&params(&data_dir, dir.path())).unwrap();
        assert_eq!(
            output.output_dir,
            dir.path().join("gmicro").join("someone").join("plate-denoise")
        );
        // 12 frames, 1 held out for validation, 4 patches each.
        assert_eq!(output.train_patches, 44);
        assert_eq!(output.val_patches, 4);

        let train = tiffio::read_f32_stack(&output.train_path).unwrap();
        assert_eq!(train.len(), 44);
        assert_eq!(train[0].dim(), (8, 8));
        let val = tiffio::read_f32_stack(&output.val_path).unwrap();
        assert_eq!(val.len(), 4);

        assert!(output.output_dir.join("run1_train.md").exists());
    }

    #[test]
    fn shuffle_and_sampling_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_stack(&data_dir, "movie.tif", 5);

        let first =
            prepare_train_data(&params(&data_dir, &dir.path().join("out1"))).unwrap();
        let second =
            prepare_train_data(&params(&data_dir, &dir.path().join("out2"))).unwrap();

        let a = tiffio::read_f32_stack(&first.train_path).unwrap();
        let b = tiffio::read_f32_stack(&second.train_path).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn single_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_stack(&data_dir, "movie.tif", 1);

        assert!(matches!(
            prepare_train_data(&params(&data_dir, dir.path())),
            Err(DataPrepError::NotEnoughFrames(1))
        ));
    }

    #[test]
    fn oversized_patch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        write_stack(&data_dir, "movie.tif", 3);

        let mut p = params(&data_dir, dir.path());
        p.patch_shape = (64, 64);
        assert!(matches!(
            prepare_train_data(&p),
            Err(DataPrepError::PatchTooLarge { .. })
        ));
    }
}
