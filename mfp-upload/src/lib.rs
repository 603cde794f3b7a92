//! PSF measurement upload pipeline
//!
//! Watches an upload directory for measurement CSVs exported by the PSF
//! analysis tool, pushes the referenced bead images to an image hosting
//! service, creates one record per measurement row in the tabular
//! database, waits for the remote side to fetch the image, and archives
//! the consumed files.

pub mod measurement;
pub mod pipeline;
pub mod schema;
pub mod services;

pub use pipeline::{UploadError, UploadPipeline, UploadSettings, UploadStats};
