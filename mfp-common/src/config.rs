//! INI configuration loading
//!
//! Credentials and directory settings for the external services live in
//! INI files with a single `DEFAULT` section. Keys are looked up at point
//! of use; there is no upfront schema validation.

use crate::{Error, Result};
use ini::Ini;
use std::path::{Path, PathBuf};

/// Key-value configuration backed by the `DEFAULT` section of an INI file.
#[derive(Debug, Clone)]
pub struct IniConfig {
    source: PathBuf,
    ini: Ini,
}

impl IniConfig {
    /// Load a configuration file. Fails when the file is missing or not
    /// parseable as INI.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self {
            source: path.to_path_buf(),
            ini,
        })
    }

    /// Look up a required key in the `DEFAULT` section.
    pub fn get(&self, key: &str) -> Result<&str> {
        self.ini
            .get_from(Some("DEFAULT"), key)
            .ok_or_else(|| {
                Error::Config(format!(
                    "missing key '{}' in {}",
                    key,
                    self.source.display()
                ))
            })
    }

    /// Look up an optional key, falling back to a default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.ini.get_from(Some("DEFAULT"), key).unwrap_or(default)
    }

    /// Look up a required key and interpret it as a path.
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(self.get(key)?))
    }
}
