//! Per-epoch training history
//!
//! One row per completed epoch, written as CSV once training finishes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Losses and accuracies of one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    /// Weighted joint loss
    pub loss: f64,
    pub disease_loss: f64,
    pub severity_loss: f64,
    pub disease_accuracy: f64,
    pub severity_accuracy: f64,
}

/// One history row; field order is the CSV column order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub disease_loss: f64,
    pub severity_loss: f64,
    pub disease_accuracy: f64,
    pub severity_accuracy: f64,
    pub val_loss: f64,
    pub val_disease_loss: f64,
    pub val_severity_loss: f64,
    pub val_disease_accuracy: f64,
    pub val_severity_accuracy: f64,
    pub learning_rate: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, train: SplitMetrics, val: SplitMetrics, learning_rate: f64) -> Self {
        Self {
            epoch,
            loss: train.loss,
            disease_loss: train.disease_loss,
            severity_loss: train.severity_loss,
            disease_accuracy: train.disease_accuracy,
            severity_accuracy: train.severity_accuracy,
            val_loss: val.loss,
            val_disease_loss: val.disease_loss,
            val_severity_loss: val.severity_loss,
            val_disease_accuracy: val.disease_accuracy,
            val_severity_accuracy: val.severity_accuracy,
            learning_rate,
        }
    }
}

/// Ordered epoch records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record with the highest validation disease accuracy (earliest on ties)
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_disease_accuracy >= r.val_disease_accuracy => Some(b),
            _ => Some(r),
        })
    }

    /// Write the history as CSV with a header row
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }
}
