//! Manifest reading and label encoding
//!
//! A manifest is a CSV file with one row per image: a path-like column
//! (one of [`PATH_COLUMNS`]), a `disease_id` and a `severity_level`.
//! Relative paths are joined with the image root; absolute paths are used
//! verbatim.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::vocabulary::LabelVocabulary;
use crate::utils::error::{DiagnosisError, Result};
use crate::SEVERITY_CLASSES;

/// Accepted path column names, in priority order
pub const PATH_COLUMNS: [&str; 4] = ["filepath", "image_path", "path", "filename"];

/// Disease label column
pub const DISEASE_COLUMN: &str = "disease_id";

/// Severity label column
pub const SEVERITY_COLUMN: &str = "severity_level";

/// One manifest row after validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Path as written in the manifest
    pub path: String,
    /// Disease name (kept as text, even when numeric)
    pub disease: String,
    /// Severity clipped into [0, 3]
    pub severity: usize,
}

/// A validated manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Which column supplied the paths
    pub path_column: String,
    pub rows: Vec<ManifestRow>,
}

/// A sample with its image path resolved and labels encoded
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub path: PathBuf,
    pub disease: usize,
    pub severity: usize,
}

impl Manifest {
    /// Read and validate a manifest CSV
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        Self::from_reader(reader)
    }

    /// Read a manifest from any CSV reader
    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<&str> = [DISEASE_COLUMN, SEVERITY_COLUMN]
            .into_iter()
            .filter(|name| column(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DiagnosisError::Manifest(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }

        let (path_column, path_idx) = PATH_COLUMNS
            .iter()
            .find_map(|name| column(name).map(|idx| (name.to_string(), idx)))
            .ok_or_else(|| {
                DiagnosisError::Manifest(format!(
                    "manifest must contain one of the path columns: {}",
                    PATH_COLUMNS.join(", ")
                ))
            })?;
        let disease_idx = column(DISEASE_COLUMN).unwrap_or_default();
        let severity_idx = column(SEVERITY_COLUMN).unwrap_or_default();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let field = |idx: usize| record.get(idx).unwrap_or("");
            let severity = parse_severity(field(severity_idx)).map_err(|raw| {
                DiagnosisError::Manifest(format!(
                    "row {}: severity '{}' is not a number",
                    line + 1,
                    raw
                ))
            })?;

            rows.push(ManifestRow {
                path: field(path_idx).to_string(),
                disease: field(disease_idx).to_string(),
                severity,
            });
        }

        debug!("Read {} manifest rows (paths from '{}')", rows.len(), path_column);
        Ok(Self { path_column, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build a vocabulary from this manifest's disease names
    pub fn vocabulary(&self) -> LabelVocabulary {
        LabelVocabulary::from_labels(self.rows.iter().map(|r| r.disease.as_str()))
    }

    /// Resolve paths and encode labels against `vocabulary`
    pub fn encode(&self, image_root: &Path, vocabulary: &LabelVocabulary) -> Result<Vec<EncodedSample>> {
        self.rows
            .iter()
            .map(|row| {
                Ok(EncodedSample {
                    path: resolve_path(&row.path, image_root),
                    disease: vocabulary.encode(&row.disease)?,
                    severity: row.severity,
                })
            })
            .collect()
    }
}

/// Encode a manifest, building the vocabulary from it unless one is supplied.
///
/// The validation split must pass the training vocabulary so both splits
/// share indices.
pub fn encode_manifest(
    manifest: &Manifest,
    image_root: &Path,
    vocabulary: Option<&LabelVocabulary>,
) -> Result<(Vec<EncodedSample>, LabelVocabulary)> {
    let vocabulary = match vocabulary {
        Some(v) => v.clone(),
        None => manifest.vocabulary(),
    };
    let samples = manifest.encode(image_root, &vocabulary)?;
    Ok((samples, vocabulary))
}

/// Absolute paths are kept verbatim, relative ones are joined with the root
pub fn resolve_path(entry: &str, image_root: &Path) -> PathBuf {
    let path = Path::new(entry);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        image_root.join(path)
    }
}

/// Parse an integer-coercible severity and clip it into the ordinal range.
/// Decimal values are clipped and then truncated.
pub fn parse_severity(raw: &str) -> std::result::Result<usize, String> {
    let value: f64 = raw.trim().parse().map_err(|_| raw.to_string())?;
    if !value.is_finite() {
        return Err(raw.to_string());
    }
    Ok(clip_severity(value))
}

/// Clip into [0, SEVERITY_CLASSES - 1]
pub fn clip_severity(value: f64) -> usize {
    value.clamp(0.0, (SEVERITY_CLASSES - 1) as f64) as usize
}
