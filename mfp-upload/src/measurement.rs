//! Measurement CSV loading
//!
//! One CSV row per analyzed bead image. Columns vary with the schema
//! version of the producing tool; rows are kept as raw string maps until
//! the mapper applies the version-specific column set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mfp_common::{Error, Result};

/// One raw CSV row, column name to unparsed cell value. Empty cells are
/// treated as absent.
#[derive(Debug, Clone, Default)]
pub struct MeasurementRow {
    columns: BTreeMap<String, String>,
}

impl MeasurementRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// The image referenced by this row. Every measurement row must carry
    /// a `PSF_path`; the image lives beside the CSV, so only the file name
    /// component is meaningful.
    pub fn image_name(&self) -> Result<&str> {
        let path = self.get("PSF_path").ok_or_else(|| {
            Error::InvalidInput("measurement row without PSF_path".to_string())
        })?;
        Ok(Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path))
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            columns: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Read a measurement CSV into rows.
pub fn load_measurement(path: impl AsRef<Path>) -> Result<Vec<MeasurementRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let mut columns = BTreeMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            if !value.is_empty() {
                columns.insert(header.to_string(), value.to_string());
            }
        }
        rows.push(MeasurementRow { columns });
    }
    Ok(rows)
}

/// List measurement CSVs waiting in the upload directory.
pub fn list_measurement_files(upload_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let pattern = upload_dir.as_ref().join("*.csv");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| Error::InvalidInput("non-UTF8 upload_dir".to_string()))?;
    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| Error::InvalidInput(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_rows_and_drops_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("psf.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "ImageName,Amplitude,Comment,PSF_path").unwrap();
        writeln!(f, "bead_001.tif,1200.5,,imgs/bead_001.tif").unwrap();
        drop(f);

        let rows = load_measurement(&csv_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Amplitude"), Some("1200.5"));
        assert!(!rows[0].has_column("Comment"));
        assert_eq!(rows[0].image_name().unwrap(), "bead_001.tif");
    }

    #[test]
    fn lists_only_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.path().join("b.tif"), [0u8; 4]).unwrap();

        let files = list_measurement_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.csv")]);
    }
}
