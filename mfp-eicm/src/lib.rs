//! Illumination-correction-matrix estimation
//!
//! Derives flat-field correction matrices from microscope shading
//! references: a 2D Gaussian fit, a 2D polynomial surface fit, a median
//! filter, or a Gaussian blur. Every estimator writes a normalized float32
//! matrix beside its input plus a Markdown provenance note. The
//! `yokogawa` module builds the shading references themselves from raw
//! flat-field acquisitions.

pub mod estimator;
pub mod yokogawa;

pub use estimator::{EstimateError, EstimatorOutput};
