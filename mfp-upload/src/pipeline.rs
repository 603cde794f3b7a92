//! Upload pipeline
//!
//! For each measurement CSV in the upload directory: map every row onto
//! the target schema, stage the referenced image on the hosting service,
//! create the database record with the image URL attached, wait (bounded)
//! until the database has generated thumbnails, delete the hosted copy,
//! and archive the consumed files.
//!
//! Re-running after a partial failure is safe: every row carries a
//! SourceHash idempotency key, and rows whose key already exists remotely
//! are skipped instead of duplicated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use mfp_common::airtable::{attachment_from_url, has_thumbnails, TableClient};

use crate::measurement::{self, MeasurementRow};
use crate::schema::{self, SchemaError, SchemaVersion};
use crate::services::imagehost::{HostError, ImageHostClient};

/// Field holding the idempotency key of an uploaded row.
const SOURCE_HASH_FIELD: &str = "SourceHash";
/// Attachment field the database fetches the image into.
const IMAGE_FIELD: &str = "PSF_Image";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Common(#[from] mfp_common::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("image referenced by row not found: {0}")]
    MissingImage(PathBuf),

    #[error("record {record_id} not finalized after {attempts} polls")]
    UploadTimeout { record_id: String, attempts: u32 },
}

/// Pipeline settings beyond the service credentials.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_dir: PathBuf,
    pub uploaded_dir: PathBuf,
    /// Delay between thumbnail polls.
    pub poll_interval: Duration,
    /// Maximum number of thumbnail polls before giving up.
    pub poll_attempts: u32,
}

impl UploadSettings {
    pub fn new(upload_dir: PathBuf, uploaded_dir: PathBuf) -> Self {
        Self {
            upload_dir,
            uploaded_dir,
            poll_interval: Duration::from_secs(1),
            poll_attempts: 300,
        }
    }
}

/// Counters reported after a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub files: usize,
    pub rows_created: usize,
    pub rows_skipped: usize,
}

pub struct UploadPipeline {
    table: TableClient,
    host: ImageHostClient,
    settings: UploadSettings,
}

impl UploadPipeline {
    pub fn new(table: TableClient, host: ImageHostClient, settings: UploadSettings) -> Self {
        Self {
            table,
            host,
            settings,
        }
    }

    /// Process every waiting measurement CSV.
    pub async fn run(&self) -> Result<UploadStats, UploadError> {
        let files = measurement::list_measurement_files(&self.settings.upload_dir)?;
        if files.is_empty() {
            info!("no new measurement files in {}", self.settings.upload_dir.display());
            return Ok(UploadStats::default());
        }
        info!("found {} measurement file(s)", files.len());

        let mut stats = UploadStats::default();
        for csv_path in files {
            let file_stats = self.process_file(&csv_path).await?;
            stats.rows_created += file_stats.rows_created;
            stats.rows_skipped += file_stats.rows_skipped;
            stats.files += 1;
            // The CSV is archived last, after all of its rows went through.
            move_into(&csv_path, &self.settings.uploaded_dir)?;
            info!("archived {}", csv_path.display());
        }
        Ok(stats)
    }

    async fn process_file(&self, csv_path: &Path) -> Result<UploadStats, UploadError> {
        let rows = measurement::load_measurement(csv_path)?;
        info!("{}: {} row(s)", csv_path.display(), rows.len());

        let mut stats = UploadStats::default();
        for (index, row) in rows.iter().enumerate() {
            if self.upload_row(csv_path, index, row).await? {
                stats.rows_created += 1;
            } else {
                stats.rows_skipped += 1;
            }
        }
        Ok(stats)
    }

    /// Upload one row. Returns false when the row was already present
    /// remotely and only the local image was archived.
    async fn upload_row(
        &self,
        csv_path: &Path,
        index: usize,
        row: &MeasurementRow,
    ) -> Result<bool, UploadError> {
        let version = SchemaVersion::of_row(row)?;
        let mut fields = schema::map_row(row, version)?;

        let image_path = csv_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(row.image_name().map_err(UploadError::Common)?);
        if !image_path.exists() {
            return Err(UploadError::MissingImage(image_path));
        }

        let key = idempotency_key(csv_path, index, &fields);
        let formula = format!("{{{}}} = \"{}\"", SOURCE_HASH_FIELD, key);
        if !self.table.find_by_formula(&formula).await?.is_empty() {
            info!(
                "{} row {} already uploaded, archiving local image only",
                csv_path.display(),
                index
            );
            move_into(&image_path, &self.settings.uploaded_dir)?;
            return Ok(false);
        }

        let hosted = self.host.upload(&image_path).await?;

        // The database fetches the image from the hosted URL itself;
        // direct binary upload is not supported.
        fields.insert(
            IMAGE_FIELD.to_string(),
            attachment_from_url(&hosted.secure_url),
        );
        fields.insert(SOURCE_HASH_FIELD.to_string(), Value::String(key));

        let record = self.table.create(&fields).await?;
        info!("created record {} for row {}", record.id, index);

        self.wait_for_thumbnails(&record.id).await?;

        self.host.destroy(&hosted.public_id).await?;
        move_into(&image_path, &self.settings.uploaded_dir)?;
        Ok(true)
    }

    /// Poll until the database reports generated thumbnails, which means
    /// it has downloaded the image from the hosting service.
    async fn wait_for_thumbnails(&self, record_id: &str) -> Result<(), UploadError> {
        for attempt in 0..self.settings.poll_attempts {
            let record = self.table.get(record_id).await?;
            if has_thumbnails(&record, IMAGE_FIELD) {
                return Ok(());
            }
            if attempt + 1 < self.settings.poll_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
        warn!("record {} never reported thumbnails", record_id);
        Err(UploadError::UploadTimeout {
            record_id: record_id.to_string(),
            attempts: self.settings.poll_attempts,
        })
    }
}

/// Idempotency key of a row: digest over the CSV file name, the row index
/// and the mapped field values. serde_json maps serialize with sorted
/// keys, so the serialization is canonical.
pub fn idempotency_key(csv_path: &Path, index: usize, fields: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    if let Some(name) = csv_path.file_name() {
        hasher.update(name.to_string_lossy().as_bytes());
    }
    hasher.update(index.to_le_bytes());
    hasher.update(Value::Object(fields.clone()).to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn move_into(file: &Path, dir: &Path) -> Result<(), mfp_common::Error> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(
        file.file_name()
            .ok_or_else(|| mfp_common::Error::InvalidInput(format!("bad path {}", file.display())))?,
    );
    // Rename when possible; the archive directory may live on another
    // filesystem, in which case fall back to copy + remove.
    if std::fs::rename(file, &target).is_err() {
        std::fs::copy(file, &target)?;
        std::fs::remove_file(file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_and_distinct() {
        let mut fields = Map::new();
        fields.insert("ImageName".into(), Value::String("bead.tif".into()));
        let a = idempotency_key(Path::new("/data/psf.csv"), 0, &fields);
        let b = idempotency_key(Path::new("/data/psf.csv"), 0, &fields);
        let c = idempotency_key(Path::new("/data/psf.csv"), 1, &fields);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn move_into_creates_archive_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bead.tif");
        std::fs::write(&src, b"img").unwrap();
        let archive = dir.path().join("uploaded");

        move_into(&src, &archive).unwrap();
        assert!(!src.exists());
        assert!(archive.join("bead.tif").exists());
    }
}
