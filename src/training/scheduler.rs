//! Learning Rate Scheduler Module
//!
//! Reduce-on-plateau decay driven by a metric that should increase
//! (validation disease accuracy). After `patience` epochs without an
//! improvement larger than `min_delta`, the learning rate is multiplied by
//! `factor`, never dropping below `min_lr`.

use serde::{Deserialize, Serialize};

use crate::model::config::PlateauConfig;

/// Reduce-on-plateau scheduler state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    lr: f64,
    best: f64,
    wait: usize,
    reductions: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, config: PlateauConfig) -> Self {
        Self {
            config,
            lr: initial_lr,
            best: f64::NEG_INFINITY,
            wait: 0,
            reductions: 0,
        }
    }

    /// Current learning rate
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Number of times the rate was reduced
    pub fn reductions(&self) -> usize {
        self.reductions
    }

    /// Feed one epoch's metric. Returns the new learning rate when it changed.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        if metric > self.best + self.config.min_delta {
            self.best = metric;
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.config.patience {
            return None;
        }
        self.wait = 0;

        if self.lr <= self.config.min_lr {
            return None;
        }
        let new_lr = (self.lr * self.config.factor).max(self.config.min_lr);
        if new_lr < self.lr {
            self.lr = new_lr;
            self.reductions += 1;
            Some(new_lr)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plateau(patience: usize) -> PlateauConfig {
        PlateauConfig {
            factor: 0.3,
            patience,
            min_lr: 1e-6,
            min_delta: 1e-4,
        }
    }

    #[test]
    fn test_reduces_after_patience() {
        let mut scheduler = ReduceLrOnPlateau::new(1e-4, plateau(2));
        assert_eq!(scheduler.step(0.5), None);
        assert_eq!(scheduler.step(0.5), None);
        let lr = scheduler.step(0.49).unwrap();
        assert!((lr - 3e-5).abs() < 1e-12);
        assert_eq!(scheduler.reductions(), 1);
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut scheduler = ReduceLrOnPlateau::new(1e-3, plateau(2));
        scheduler.step(0.5);
        scheduler.step(0.5);
        scheduler.step(0.6);
        assert_eq!(scheduler.step(0.6), None);
        assert_eq!(scheduler.lr(), 1e-3);
    }

    #[test]
    fn test_tiny_gain_is_not_improvement() {
        let mut scheduler = ReduceLrOnPlateau::new(1e-3, plateau(1));
        scheduler.step(0.5);
        assert!(scheduler.step(0.50005).is_some());
    }

    #[test]
    fn test_respects_floor() {
        let mut scheduler = ReduceLrOnPlateau::new(2e-6, plateau(1));
        scheduler.step(0.5);
        assert_eq!(scheduler.step(0.4), Some(1e-6));
        assert_eq!(scheduler.step(0.4), None);
        assert_eq!(scheduler.lr(), 1e-6);
    }
}
