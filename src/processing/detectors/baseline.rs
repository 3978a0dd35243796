use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Mean and population standard deviation of a fault-free calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatistics {
    pub mean: f64,
    pub std: f64,
}

impl BaselineStatistics {
    pub fn fit(samples: &[f64]) -> Result<Self> {
        if samples.is_empty() {
            return Err(MonitorError::invalid_parameter(
                "calibration",
                "at least one sample is required",
            ));
        }
        if let Some(bad) = samples.iter().find(|v| !v.is_finite()) {
            return Err(MonitorError::invalid_parameter(
                "calibration",
                format!("non-finite sample {}", bad),
            ));
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let all_equal = samples.iter().all(|&v| v == samples[0]);
        let std = if all_equal {
            0.0
        } else {
            (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
        };

        Ok(Self { mean, std })
    }

    /// A zero-variance baseline cannot judge deviations.
    pub fn is_degenerate(&self) -> bool {
        self.std <= 0.0
    }
}

/// Calibration state of a fixed-baseline detector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Baseline {
    #[default]
    Untrained,
    Trained(BaselineStatistics),
}

impl Baseline {
    pub fn statistics(&self) -> Option<&BaselineStatistics> {
        match self {
            Baseline::Untrained => None,
            Baseline::Trained(stats) => Some(stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_population_statistics() {
        let stats = BaselineStatistics::fit(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn constant_data_is_degenerate() {
        let stats = BaselineStatistics::fit(&[30.01; 20]).unwrap();
        assert_eq!(stats.std, 0.0);
        assert!(stats.is_degenerate());
    }

    #[test]
    fn empty_calibration_is_rejected() {
        assert!(BaselineStatistics::fit(&[]).is_err());
        assert!(BaselineStatistics::fit(&[1.0, f64::NAN]).is_err());
    }
}
