//! Versioned measurement schema mapping
//!
//! The PSF analysis tool has changed its CSV column naming over time; the
//! `version` column of each row selects the applicable column set. Legacy
//! rows are renamed to the current convention before emission, so the
//! mapper always produces the same target schema: every target field is
//! present, optional fields default to null, and typed fields are cast.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::measurement::MeasurementRow;

#[derive(Debug, Error)]
pub enum SchemaError {
    /// The `version` column is absent or carries an unsupported value.
    #[error("unknown measurement schema version: '{0}'")]
    UnknownVersion(String),

    /// A required measurement column is missing from the row.
    #[error("missing measurement column '{0}'")]
    MissingColumn(String),

    /// A cell could not be cast to the declared field type.
    #[error("column '{column}': cannot parse '{value}' as {expected}")]
    InvalidValue {
        column: String,
        value: String,
        expected: &'static str,
    },
}

/// Known measurement schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// Legacy tool releases (0.x), with the old column naming.
    V0,
    /// Current tool releases (1.x).
    V1,
}

impl SchemaVersion {
    /// Dispatch on the version string of a row. Anything outside the two
    /// known major versions is rejected.
    pub fn parse(version: &str) -> Result<Self, SchemaError> {
        if version == "0" || version.starts_with("0.") {
            Ok(SchemaVersion::V0)
        } else if version == "1" || version.starts_with("1.") {
            Ok(SchemaVersion::V1)
        } else {
            Err(SchemaError::UnknownVersion(version.to_string()))
        }
    }

    /// Read and dispatch on the `version` column of a row.
    pub fn of_row(row: &MeasurementRow) -> Result<Self, SchemaError> {
        match row.get("version") {
            Some(version) => Self::parse(version),
            None => Err(SchemaError::UnknownVersion("<missing>".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldType {
    Str,
    Int,
    Float,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Str => "string",
            FieldType::Int => "integer",
            FieldType::Float => "float",
        }
    }
}

/// Required measurement columns of the current schema. `Magnification` is
/// emitted as a string (the tabular database field is single-line text).
const MEASUREMENT_FIELDS: &[(&str, FieldType)] = &[
    ("ImageName", FieldType::Str),
    ("Date", FieldType::Str),
    ("Microscope", FieldType::Str),
    ("Magnification", FieldType::Str),
    ("NA", FieldType::Float),
    ("Amplitude", FieldType::Float),
    ("Background", FieldType::Float),
    ("X", FieldType::Float),
    ("Y", FieldType::Float),
    ("Z", FieldType::Float),
    ("FWHM_X", FieldType::Float),
    ("FWHM_Y", FieldType::Float),
    ("FWHM_Z", FieldType::Float),
    ("PrincipalAxis_1", FieldType::Float),
    ("PrincipalAxis_2", FieldType::Float),
    ("PrincipalAxis_3", FieldType::Float),
    ("SignalToBG", FieldType::Float),
    ("XYpixelsize", FieldType::Float),
    ("Zspacing", FieldType::Float),
    ("cov_xx", FieldType::Float),
    ("cov_xy", FieldType::Float),
    ("cov_xz", FieldType::Float),
    ("cov_yy", FieldType::Float),
    ("cov_yz", FieldType::Float),
    ("cov_zz", FieldType::Float),
    ("sde_peak", FieldType::Float),
    ("sde_background", FieldType::Float),
    ("sde_X", FieldType::Float),
    ("sde_Y", FieldType::Float),
    ("sde_Z", FieldType::Float),
    ("sde_cov_xx", FieldType::Float),
    ("sde_cov_xy", FieldType::Float),
    ("sde_cov_xz", FieldType::Float),
    ("sde_cov_yy", FieldType::Float),
    ("sde_cov_yz", FieldType::Float),
    ("sde_cov_zz", FieldType::Float),
];

/// Free-text/numeric metadata columns. Not every export carries them;
/// absent columns map to null.
const OPTIONAL_FIELDS: &[(&str, FieldType)] = &[
    ("Objective_id", FieldType::Str),
    ("Temperature", FieldType::Int),
    ("AiryUnit", FieldType::Int),
    ("BeadSize", FieldType::Int),
    ("BeadSupplier", FieldType::Str),
    ("MountingMedium", FieldType::Str),
    ("Operator", FieldType::Str),
    ("MicroscopeType", FieldType::Str),
    ("Excitation", FieldType::Int),
    ("Emission", FieldType::Int),
    ("Comment", FieldType::Str),
];

/// Column renames applied to legacy (0.x) rows, old name to current name.
const V0_RENAMES: &[(&str, &str)] = &[
    ("PeakIntensity", "Amplitude"),
    ("FWHMx", "FWHM_X"),
    ("FWHMy", "FWHM_Y"),
    ("FWHMz", "FWHM_Z"),
    ("PrincipalAxis1", "PrincipalAxis_1"),
    ("PrincipalAxis2", "PrincipalAxis_2"),
    ("PrincipalAxis3", "PrincipalAxis_3"),
    ("SignalToBackground", "SignalToBG"),
    ("sde_amplitude", "sde_peak"),
];

/// Source column for a target field under the given schema version.
fn source_column(target: &str, version: SchemaVersion) -> &str {
    if version == SchemaVersion::V0 {
        for (old, new) in V0_RENAMES {
            if *new == target {
                return old;
            }
        }
    }
    target
}

fn cast(column: &str, value: &str, ty: FieldType) -> Result<Value, SchemaError> {
    let invalid = |expected: &'static str| SchemaError::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
        expected,
    };
    match ty {
        FieldType::Str => Ok(Value::String(value.to_string())),
        FieldType::Int => {
            // Exports sometimes write integers with a float suffix ("23.0").
            let parsed = value
                .parse::<i64>()
                .or_else(|_| value.parse::<f64>().map(|f| f as i64))
                .map_err(|_| invalid(FieldType::Int.name()))?;
            Ok(Value::Number(parsed.into()))
        }
        FieldType::Float => {
            let parsed = value
                .parse::<f64>()
                .map_err(|_| invalid(FieldType::Float.name()))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| invalid(FieldType::Float.name()))
        }
    }
}

/// Map a raw measurement row onto the target schema for the given version.
///
/// The result always contains every measurement field and every optional
/// field; optional fields absent from the source row are null.
pub fn map_row(
    row: &MeasurementRow,
    version: SchemaVersion,
) -> Result<Map<String, Value>, SchemaError> {
    let mut fields = Map::new();

    for (target, ty) in MEASUREMENT_FIELDS {
        let source = source_column(target, version);
        let value = row
            .get(source)
            .ok_or_else(|| SchemaError::MissingColumn(source.to_string()))?;
        fields.insert(target.to_string(), cast(target, value, *ty)?);
    }

    for (target, ty) in OPTIONAL_FIELDS {
        let source = source_column(target, version);
        let value = match row.get(source) {
            Some(value) => cast(target, value, *ty)?,
            None => Value::Null,
        };
        fields.insert(target.to_string(), value);
    }

    Ok(fields)
}

/// The full target field set, in schema order.
pub fn target_fields() -> impl Iterator<Item = &'static str> {
    MEASUREMENT_FIELDS
        .iter()
        .chain(OPTIONAL_FIELDS)
        .map(|(name, _)| *name)
}
