use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::baseline::BaselineStatistics;
use super::{Detection, DetectorInstance, DetectorKind, RingBuffer};
use crate::error::{MonitorError, Result};

/// How many samples the window must hold before the rolling average is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupQuorum {
    /// Decide from the first sample.
    #[default]
    Immediate,
    /// Wait until the window is half full (rounded down).
    HalfWindow,
}

impl WarmupQuorum {
    pub fn samples(&self, window: usize) -> usize {
        match self {
            WarmupQuorum::Immediate => 0,
            WarmupQuorum::HalfWindow => window / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reference {
    Untrained,
    /// Calibrated from a zero-variance baseline. Never flags.
    Degenerate,
    Fixed { value: f64, threshold: f64 },
}

/// Compares the rolling average of the last `window` samples against a
/// reference value to catch slow drift.
#[derive(Debug, Clone)]
pub struct SlidingWindowDetector {
    buffer: RingBuffer,
    quorum: usize,
    /// Threshold in calibration standard deviations. `None` for a fixed
    /// setpoint, which calibration never touches.
    calibration_k: Option<f64>,
    reference: Reference,
    warned_untrained: bool,
}

impl SlidingWindowDetector {
    /// Detector around a fixed engineering setpoint.
    pub fn with_setpoint(
        window: usize,
        reference_value: f64,
        threshold: f64,
        quorum: WarmupQuorum,
    ) -> Result<Self> {
        validate_window(window)?;
        if !reference_value.is_finite() {
            return Err(MonitorError::invalid_parameter(
                "sliding_window.reference",
                format!("must be finite, got {}", reference_value),
            ));
        }
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(MonitorError::invalid_parameter(
                "sliding_window.threshold",
                format!("must be a finite value >= 0, got {}", threshold),
            ));
        }
        Ok(Self {
            buffer: RingBuffer::new(window),
            quorum: quorum.samples(window),
            calibration_k: None,
            reference: Reference::Fixed {
                value: reference_value,
                threshold,
            },
            warned_untrained: false,
        })
    }

    /// Detector whose reference is the calibration mean and whose threshold
    /// is `k` calibration standard deviations.
    pub fn from_calibration(window: usize, k: f64, quorum: WarmupQuorum) -> Result<Self> {
        validate_window(window)?;
        if !k.is_finite() || k < 0.0 {
            return Err(MonitorError::invalid_parameter(
                "sliding_window.k",
                format!("must be a finite value >= 0, got {}", k),
            ));
        }
        Ok(Self {
            buffer: RingBuffer::new(window),
            quorum: quorum.samples(window),
            calibration_k: Some(k),
            reference: Reference::Untrained,
            warned_untrained: false,
        })
    }

    /// `(reference_value, threshold)` once known.
    pub fn reference(&self) -> Option<(f64, f64)> {
        match self.reference {
            Reference::Fixed { value, threshold } => Some((value, threshold)),
            _ => None,
        }
    }

    /// Returns `(is_anomaly, deviation)` where deviation is the rolling
    /// average minus the reference value.
    pub fn update(&mut self, value: f64) -> (bool, f64) {
        let (reference_value, threshold) = match self.reference {
            Reference::Fixed { value, threshold } => (value, threshold),
            Reference::Degenerate => return (false, 0.0),
            Reference::Untrained => {
                if !self.warned_untrained {
                    warn!("sliding window detector updated before calibration");
                    self.warned_untrained = true;
                }
                return (false, 0.0);
            }
        };

        self.buffer.add(value);
        if self.buffer.len() < self.quorum {
            return (false, 0.0);
        }

        let rolling_avg = match self.buffer.mean() {
            Some(avg) => avg,
            None => return (false, 0.0),
        };
        let deviation = rolling_avg - reference_value;
        (deviation.abs() > threshold, deviation)
    }
}

fn validate_window(window: usize) -> Result<()> {
    if window == 0 {
        return Err(MonitorError::invalid_parameter(
            "sliding_window.window",
            "must be at least 1",
        ));
    }
    Ok(())
}

impl DetectorInstance for SlidingWindowDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SlidingWindow
    }

    fn process_sample(&mut self, value: f64) -> Detection {
        let (is_anomaly, deviation) = self.update(value);
        Detection::new(is_anomaly, deviation)
    }

    fn train(&mut self, calibration: &[f64]) -> Result<()> {
        let Some(k) = self.calibration_k else {
            debug!("sliding window detector has a fixed setpoint, calibration ignored");
            return Ok(());
        };

        let stats = BaselineStatistics::fit(calibration)?;
        self.reference = if stats.is_degenerate() {
            warn!(mean = stats.mean, "zero-variance baseline, sliding window detector will never flag");
            Reference::Degenerate
        } else {
            let threshold = k * stats.std;
            debug!(
                reference = stats.mean,
                threshold,
                window = self.buffer.capacity(),
                "sliding window reference fitted"
            );
            Reference::Fixed {
                value: stats.mean,
                threshold,
            }
        };
        Ok(())
    }

    fn needs_calibration(&self) -> bool {
        self.reference == Reference::Untrained
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}
