//! # MFP Common Library
//!
//! Shared code for the facility pipeline binaries including:
//! - INI configuration loading
//! - Tabular database (Airtable-style) REST client
//! - Scientific TIFF I/O over ndarray
//! - Provenance note writing
//! - Matrix normalization

pub mod airtable;
pub mod config;
pub mod error;
pub mod matrix;
pub mod provenance;
pub mod tiffio;

pub use error::{Error, Result};
