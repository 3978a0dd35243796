use tracing::{debug, warn};

use super::baseline::{Baseline, BaselineStatistics};
use super::{Detection, DetectorInstance, DetectorKind, RingBuffer};
use crate::error::{MonitorError, Result};

/// Samples a rolling window must hold before its statistics are trusted.
pub const ROLLING_WARMUP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZScoreMode {
    /// Reference fitted once from calibration data.
    Fixed,
    /// Reference re-estimated from the trailing `window` samples.
    Rolling { window: usize, warmup: usize },
}

impl ZScoreMode {
    /// Rolling mode with the default warm-up, shortened to fit small windows.
    pub fn rolling(window: usize) -> Self {
        ZScoreMode::Rolling {
            window,
            warmup: ROLLING_WARMUP.min(window),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreDetectorConfig {
    pub threshold: f64,
    pub mode: ZScoreMode,
}

#[derive(Debug, Clone)]
enum Reference {
    Fixed(Baseline),
    Rolling { buffer: RingBuffer, warmup: usize },
}

/// Flags a sample whose distance from the reference mean exceeds
/// `threshold` standard deviations.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    threshold: f64,
    reference: Reference,
    warned_untrained: bool,
}

impl ZScoreDetector {
    pub fn new(config: ZScoreDetectorConfig) -> Result<Self> {
        if !config.threshold.is_finite() || config.threshold < 0.0 {
            return Err(MonitorError::invalid_parameter(
                "zscore.threshold",
                format!("must be a finite value >= 0, got {}", config.threshold),
            ));
        }

        let reference = match config.mode {
            ZScoreMode::Fixed => Reference::Fixed(Baseline::Untrained),
            ZScoreMode::Rolling { window, warmup } => {
                if window == 0 {
                    return Err(MonitorError::invalid_parameter(
                        "zscore.window",
                        "must be at least 1",
                    ));
                }
                if warmup > window {
                    return Err(MonitorError::invalid_parameter(
                        "zscore.warmup",
                        format!("{} exceeds window size {}", warmup, window),
                    ));
                }
                Reference::Rolling {
                    buffer: RingBuffer::new(window),
                    warmup,
                }
            }
        };

        Ok(Self {
            threshold: config.threshold,
            reference,
            warned_untrained: false,
        })
    }

    /// Fixed-baseline detector that still needs `train`.
    pub fn fixed(threshold: f64) -> Result<Self> {
        Self::new(ZScoreDetectorConfig {
            threshold,
            mode: ZScoreMode::Fixed,
        })
    }

    pub fn with_baseline(threshold: f64, baseline: BaselineStatistics) -> Result<Self> {
        let mut detector = Self::fixed(threshold)?;
        detector.reference = Reference::Fixed(Baseline::Trained(baseline));
        Ok(detector)
    }

    pub fn rolling(window: usize, threshold: f64) -> Result<Self> {
        Self::new(ZScoreDetectorConfig {
            threshold,
            mode: ZScoreMode::rolling(window),
        })
    }

    pub fn baseline(&self) -> Option<&BaselineStatistics> {
        match &self.reference {
            Reference::Fixed(baseline) => baseline.statistics(),
            Reference::Rolling { .. } => None,
        }
    }

    /// Returns `(is_anomaly, z_score)`.
    pub fn update(&mut self, value: f64) -> (bool, f64) {
        let (mean, std) = match &mut self.reference {
            Reference::Fixed(Baseline::Untrained) => {
                if !self.warned_untrained {
                    warn!("fixed-baseline z-score detector updated before calibration");
                    self.warned_untrained = true;
                }
                return (false, 0.0);
            }
            Reference::Fixed(Baseline::Trained(stats)) => (stats.mean, stats.std),
            Reference::Rolling { buffer, warmup } => {
                buffer.add(value);
                if buffer.len() < *warmup {
                    return (false, 0.0);
                }
                match (buffer.mean(), buffer.std_dev()) {
                    (Some(mean), Some(std)) => (mean, std),
                    _ => return (false, 0.0),
                }
            }
        };

        if std <= 0.0 {
            return (false, 0.0);
        }

        let z = (value - mean).abs() / std;
        (z > self.threshold, z)
    }
}

impl DetectorInstance for ZScoreDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ZScore
    }

    fn process_sample(&mut self, value: f64) -> Detection {
        let (is_anomaly, z) = self.update(value);
        Detection::new(is_anomaly, z)
    }

    fn train(&mut self, calibration: &[f64]) -> Result<()> {
        match &mut self.reference {
            Reference::Fixed(baseline) => {
                let stats = BaselineStatistics::fit(calibration)?;
                debug!(
                    mean = stats.mean,
                    std = stats.std,
                    threshold = self.threshold,
                    "z-score baseline fitted"
                );
                if stats.is_degenerate() {
                    warn!(mean = stats.mean, "zero-variance baseline, z-score detector will never flag");
                }
                *baseline = Baseline::Trained(stats);
            }
            Reference::Rolling { .. } => {
                debug!("rolling z-score detector is self-calibrating, calibration ignored");
            }
        }
        Ok(())
    }

    fn needs_calibration(&self) -> bool {
        matches!(self.reference, Reference::Fixed(Baseline::Untrained))
    }

    fn reset(&mut self) {
        if let Reference::Rolling { buffer, .. } = &mut self.reference {
            buffer.clear();
        }
    }
}
