//! Stratified train/validation split of an annotations CSV
//!
//! Rows are grouped by the `(disease_id, severity_level)` pair and each group
//! is split proportionally, so both outputs keep the joint label balance.
//! All original columns are preserved; `filepath` (copied from `filename`)
//! and `image_dir` are appended so the outputs are directly usable as
//! training manifests.
//!
//! The split is deterministic for a given seed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::manifest::{parse_severity, DISEASE_COLUMN, SEVERITY_COLUMN};
use crate::dataset::vocabulary::LabelVocabulary;
use crate::utils::error::{DiagnosisError, Result};

/// Configuration for the train/validation split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of each stratum that goes to validation
    pub val_ratio: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            val_ratio: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(val_ratio: f64, seed: u64) -> Result<Self> {
        if !(val_ratio > 0.0 && val_ratio < 1.0) {
            return Err(DiagnosisError::Config(format!(
                "validation ratio must be in (0, 1), got {}",
                val_ratio
            )));
        }
        Ok(Self { val_ratio, seed })
    }
}

/// Sizes of the two outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStats {
    pub train: usize,
    pub val: usize,
    pub strata: usize,
}

/// An annotations table split into train and validation rows
#[derive(Debug, Clone)]
pub struct ManifestSplit {
    headers: StringRecord,
    pub train: Vec<StringRecord>,
    pub val: Vec<StringRecord>,
    strata: usize,
}

impl ManifestSplit {
    /// Read an annotations CSV (must contain `filename`, `disease_id`,
    /// `severity_level`) and split it
    pub fn from_csv(annotations: &Path, config: &SplitConfig) -> Result<Self> {
        if !annotations.exists() {
            return Err(DiagnosisError::PathNotFound(annotations.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(annotations)?;
        let headers = reader.headers()?.clone();
        let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_records(headers, records, config)
    }

    pub fn from_records(
        headers: StringRecord,
        records: Vec<StringRecord>,
        config: &SplitConfig,
    ) -> Result<Self> {
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                DiagnosisError::Manifest(format!("annotations CSV must include a '{}' column", name))
            })
        };
        column("filename")?;
        let disease_idx = column(DISEASE_COLUMN)?;
        let severity_idx = column(SEVERITY_COLUMN)?;

        let diseases = LabelVocabulary::from_labels(records.iter().map(|r| r.get(disease_idx).unwrap_or("")));

        // Group row indices by joint label
        let mut strata: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            let disease = diseases.encode(record.get(disease_idx).unwrap_or(""))?;
            let severity = parse_severity(record.get(severity_idx).unwrap_or("")).map_err(|raw| {
                DiagnosisError::Manifest(format!("row {}: severity '{}' is not a number", i + 1, raw))
            })?;
            strata.entry((disease, severity)).or_default().push(i);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut is_val = vec![false; records.len()];
        for rows in strata.values_mut() {
            rows.shuffle(&mut rng);
            for &i in rows.iter().take(validation_count(rows.len(), config.val_ratio)) {
                is_val[i] = true;
            }
        }

        let (mut train, mut val) = (Vec::new(), Vec::new());
        for (record, to_val) in records.into_iter().zip(is_val) {
            if to_val {
                val.push(record);
            } else {
                train.push(record);
            }
        }

        Ok(Self {
            headers,
            train,
            val,
            strata: strata.len(),
        })
    }

    pub fn stats(&self) -> SplitStats {
        SplitStats {
            train: self.train.len(),
            val: self.val.len(),
            strata: self.strata,
        }
    }

    /// Write `train.csv` and `val.csv` into `output_dir`, returning their paths
    pub fn save(&self, output_dir: &Path, image_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(output_dir)?;
        let train_path = output_dir.join("train.csv");
        let val_path = output_dir.join("val.csv");

        self.write_rows(&train_path, &self.train, image_dir)?;
        self.write_rows(&val_path, &self.val, image_dir)?;

        info!("Saved {} training samples to {:?}", self.train.len(), train_path);
        info!("Saved {} validation samples to {:?}", self.val.len(), val_path);
        Ok((train_path, val_path))
    }

    fn write_rows(&self, path: &Path, rows: &[StringRecord], image_dir: &Path) -> Result<()> {
        let filename_idx = self.headers.iter().position(|h| h == "filename");
        let image_dir = image_dir.to_string_lossy();

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = self.headers.clone();
        header.push_field("filepath");
        header.push_field("image_dir");
        writer.write_record(&header)?;

        for row in rows {
            let mut out = row.clone();
            let filename = filename_idx.and_then(|i| row.get(i)).unwrap_or("");
            out.push_field(filename);
            out.push_field(&image_dir);
            writer.write_record(&out)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Rows of a stratum that go to validation; any stratum of two or more rows
/// contributes at least one and keeps at least one for training
fn validation_count(n: usize, ratio: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * ratio).round() as usize).clamp(1, n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::Manifest;
    use tempfile::TempDir;

    fn annotations(dir: &TempDir) -> PathBuf {
        let mut text = String::from("filename,disease_id,severity_level\n");
        for i in 0..20 {
            text.push_str(&format!("img_{}.jpg,rust,{}\n", i, i % 2));
        }
        for i in 20..30 {
            text.push_str(&format!("img_{}.jpg,scab,3\n", i));
        }
        let path = dir.path().join("annotations.csv");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_stratified_counts() {
        let dir = TempDir::new().unwrap();
        let split = ManifestSplit::from_csv(&annotations(&dir), &SplitConfig::default()).unwrap();

        let stats = split.stats();
        assert_eq!(stats.strata, 3);
        assert_eq!(stats.val, 2 + 2 + 2);
        assert_eq!(stats.train + stats.val, 30);
    }

    #[test]
    fn test_split_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let path = annotations(&dir);
        let a = ManifestSplit::from_csv(&path, &SplitConfig::default()).unwrap();
        let b = ManifestSplit::from_csv(&path, &SplitConfig::default()).unwrap();
        assert_eq!(a.val, b.val);

        let c = ManifestSplit::from_csv(&path, &SplitConfig::new(0.2, 7).unwrap()).unwrap();
        assert_eq!(c.val.len(), a.val.len());
    }

    #[test]
    fn test_saved_outputs_are_valid_manifests() {
        let dir = TempDir::new().unwrap();
        let split = ManifestSplit::from_csv(&annotations(&dir), &SplitConfig::default()).unwrap();
        let (train_path, val_path) = split.save(&dir.path().join("processed"), Path::new("/images")).unwrap();

        let train = Manifest::from_csv(&train_path).unwrap();
        let val = Manifest::from_csv(&val_path).unwrap();
        assert_eq!(train.path_column, "filepath");
        assert_eq!(train.len() + val.len(), 30);
        assert!(train.rows.iter().all(|r| r.path.starts_with("img_")));
    }

    #[test]
    fn test_equivalent_severities_share_a_stratum() {
        let headers = StringRecord::from(vec!["filename", "disease_id", "severity_level"]);
        let records = vec![
            StringRecord::from(vec!["a.jpg", "rust", "1"]),
            StringRecord::from(vec!["b.jpg", "rust", "1.0"]),
            StringRecord::from(vec!["c.jpg", "rust", "7"]),
            StringRecord::from(vec!["d.jpg", "rust", "3"]),
        ];
        let split = ManifestSplit::from_records(headers, records, &SplitConfig::default()).unwrap();
        assert_eq!(split.stats().strata, 2);
        assert_eq!(split.stats().val, 2);
    }

    #[test]
    fn test_non_numeric_severity_rejected() {
        let headers = StringRecord::from(vec!["filename", "disease_id", "severity_level"]);
        let records = vec![StringRecord::from(vec!["a.jpg", "rust", "high"])];
        let err = ManifestSplit::from_records(headers, records, &SplitConfig::default()).unwrap_err();
        assert!(matches!(err, DiagnosisError::Manifest(_)));
    }

    #[test]
    fn test_requires_filename_column() {
        let headers = StringRecord::from(vec!["path", "disease_id", "severity_level"]);
        let err = ManifestSplit::from_records(headers, Vec::new(), &SplitConfig::default()).unwrap_err();
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn test_validation_count_edges() {
        assert_eq!(validation_count(1, 0.2), 0);
        assert_eq!(validation_count(2, 0.2), 1);
        assert_eq!(validation_count(10, 0.2), 2);
        assert_eq!(validation_count(3, 0.9), 2);
    }

    #[test]
    fn test_invalid_ratio() {
        assert!(SplitConfig::new(0.0, 1).is_err());
        assert!(SplitConfig::new(1.0, 1).is_err());
    }
}
