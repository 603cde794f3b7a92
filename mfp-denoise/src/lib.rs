//! mfp-denoise - training data preparation for the denoising model
//!
//! Turns acquired image stacks into shuffled train/validation patch
//! stacks for an external noise2void training job.

pub mod dataprep;

pub use dataprep::{prepare_train_data, DataPrepError, DataPrepParams, DataPrepOutput};
