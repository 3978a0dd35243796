use tracing::{debug, warn};

use super::baseline::BaselineStatistics;
use super::{Detection, DetectorInstance, DetectorKind};
use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HysteresisState {
    #[default]
    Normal,
    Anomaly,
}

/// Inner band `(low, high)` plus the symmetric outer `margin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisBand {
    pub low: f64,
    pub high: f64,
    pub margin: f64,
}

impl HysteresisBand {
    pub fn new(low: f64, high: f64, margin: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(MonitorError::invalid_parameter(
                "hysteresis.band",
                format!("need finite low < high, got [{}, {}]", low, high),
            ));
        }
        if !margin.is_finite() || margin < 0.0 {
            return Err(MonitorError::invalid_parameter(
                "hysteresis.margin",
                format!("must be a finite value >= 0, got {}", margin),
            ));
        }
        Ok(Self { low, high, margin })
    }

    /// `low = mean - k*std`, `high = mean + k*std`, `margin = factor*std`.
    /// `None` for a zero-variance baseline, which has no usable band.
    pub fn from_baseline(
        baseline: &BaselineStatistics,
        k: f64,
        hysteresis_factor: f64,
    ) -> Option<Self> {
        if baseline.is_degenerate() {
            return None;
        }
        Self::new(
            baseline.mean - k * baseline.std,
            baseline.mean + k * baseline.std,
            hysteresis_factor * baseline.std,
        )
        .ok()
    }

    /// Trigger: strictly outside the margin-expanded band.
    fn triggers(&self, value: f64) -> bool {
        value < self.low - self.margin || value > self.high + self.margin
    }

    /// Release: strictly inside the inner band.
    fn releases(&self, value: f64) -> bool {
        self.low < value && value < self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Limits {
    Untrained,
    /// Calibrated from a zero-variance baseline. Never flags.
    Degenerate,
    Band(HysteresisBand),
}

/// Band width in calibration standard deviations.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BandFit {
    k: f64,
    hysteresis_factor: f64,
}

/// Two-state latch with a dead band between trigger and release.
#[derive(Debug, Clone)]
pub struct HysteresisDetector {
    /// `None` for engineering limits, which calibration never touches.
    fit: Option<BandFit>,
    limits: Limits,
    state: HysteresisState,
    warned_untrained: bool,
}

impl HysteresisDetector {
    /// Detector with absolute engineering limits.
    pub fn new(band: HysteresisBand) -> Self {
        Self {
            fit: None,
            limits: Limits::Band(band),
            state: HysteresisState::Normal,
            warned_untrained: false,
        }
    }

    /// Detector whose band is derived from calibration data by `train`.
    pub fn from_calibration(k: f64, hysteresis_factor: f64) -> Result<Self> {
        if !k.is_finite() || k <= 0.0 {
            return Err(MonitorError::invalid_parameter(
                "hysteresis.k",
                format!("must be a finite value > 0, got {}", k),
            ));
        }
        if !hysteresis_factor.is_finite() || hysteresis_factor < 0.0 {
            return Err(MonitorError::invalid_parameter(
                "hysteresis.hysteresis_factor",
                format!("must be a finite value >= 0, got {}", hysteresis_factor),
            ));
        }
        Ok(Self {
            fit: Some(BandFit {
                k,
                hysteresis_factor,
            }),
            limits: Limits::Untrained,
            state: HysteresisState::Normal,
            warned_untrained: false,
        })
    }

    pub fn state(&self) -> HysteresisState {
        self.state
    }

    pub fn band(&self) -> Option<HysteresisBand> {
        match self.limits {
            Limits::Band(band) => Some(band),
            _ => None,
        }
    }

    /// Applies the transition for `value` and returns whether the latch is
    /// in the anomaly state afterwards.
    pub fn update(&mut self, value: f64) -> bool {
        let band = match self.limits {
            Limits::Band(band) => band,
            Limits::Degenerate => return false,
            Limits::Untrained => {
                if !self.warned_untrained {
                    warn!("hysteresis detector updated before calibration");
                    self.warned_untrained = true;
                }
                return false;
            }
        };

        self.state = match self.state {
            HysteresisState::Normal if band.triggers(value) => HysteresisState::Anomaly,
            HysteresisState::Anomaly if band.releases(value) => HysteresisState::Normal,
            state => state,
        };

        self.state == HysteresisState::Anomaly
    }
}

impl DetectorInstance for HysteresisDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Hysteresis
    }

    fn process_sample(&mut self, value: f64) -> Detection {
        Detection::new(self.update(value), value)
    }

    fn train(&mut self, calibration: &[f64]) -> Result<()> {
        let Some(fit) = self.fit else {
            debug!("hysteresis detector has engineering limits, calibration ignored");
            return Ok(());
        };

        let stats = BaselineStatistics::fit(calibration)?;
        self.limits = match HysteresisBand::from_baseline(&stats, fit.k, fit.hysteresis_factor) {
            Some(band) => {
                debug!(
                    low = band.low,
                    high = band.high,
                    margin = band.margin,
                    "hysteresis band fitted"
                );
                Limits::Band(band)
            }
            None => {
                warn!(mean = stats.mean, "zero-variance baseline, hysteresis detector will never flag");
                Limits::Degenerate
            }
        };
        Ok(())
    }

    fn needs_calibration(&self) -> bool {
        self.limits == Limits::Untrained
    }

    fn reset(&mut self) {
        self.state = HysteresisState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> HysteresisDetector {
        HysteresisDetector::new(HysteresisBand::new(29.97, 30.02, 0.01).unwrap())
    }

    fn run(detector: &mut HysteresisDetector, values: &[f64]) -> Vec<bool> {
        values.iter().map(|&v| detector.update(v)).collect()
    }

    #[test]
    fn value_on_outer_boundary_does_not_trigger() {
        let mut detector = detector();
        assert_eq!(run(&mut detector, &[30.00, 30.03, 30.00]), vec![false, false, false]);
    }

    #[test]
    fn latches_until_strictly_inside_inner_band() {
        let mut detector = detector();
        // 30.025 sits in the dead band, 30.02 is on the inner edge
        let states = run(&mut detector, &[30.00, 30.05, 30.025, 30.02, 29.99, 30.00]);
        assert_eq!(states, vec![false, true, true, true, false, false]);
    }

    #[test]
    fn low_side_trigger_and_release() {
        let mut detector = detector();
        let states = run(&mut detector, &[29.965, 29.95, 29.97, 29.98]);
        assert_eq!(states, vec![false, true, true, false]);
    }

    #[test]
    fn zero_margin_triggers_just_outside_band() {
        let mut detector = HysteresisDetector::new(HysteresisBand::new(4.8, 5.2, 0.0).unwrap());
        assert_eq!(run(&mut detector, &[5.0, 5.2, 5.21, 5.2, 5.1]), vec![false, false, true, true, false]);
    }

    #[test]
    fn reset_returns_to_normal() {
        let mut detector = detector();
        assert!(detector.update(31.0));
        detector.reset();
        assert_eq!(detector.state(), HysteresisState::Normal);
        assert_eq!(run(&mut detector, &[30.0, 31.0, 30.0]), vec![false, true, false]);
    }

    #[test]
    fn reset_replays_identically() {
        let values = [30.0, 30.05, 30.025, 30.02, 29.99, 29.95, 29.975, 30.01, 30.04];
        let mut fresh = detector();
        let expected = run(&mut fresh, &values);

        let mut reused = detector();
        // leave the latch in the anomaly state before resetting
        run(&mut reused, &[31.0, 30.025]);
        assert_eq!(reused.state(), HysteresisState::Anomaly);
        reused.reset();
        assert_eq!(run(&mut reused, &values), expected);
        assert_eq!(reused.state(), fresh.state());
    }

    #[test]
    fn calibrated_band_from_baseline() {
        let mut detector = HysteresisDetector::from_calibration(3.0, 0.5).unwrap();
        assert!(!detector.update(1e9));
        detector.train(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        let band = detector.band().unwrap();
        assert!((band.low + 1.0).abs() < 1e-12);
        assert!((band.high - 11.0).abs() < 1e-12);
        assert!((band.margin - 1.0).abs() < 1e-12);
        assert!(!detector.update(11.5));
        assert!(detector.update(12.5));
    }

    #[test]
    fn retraining_refits_the_band() {
        let mut detector = HysteresisDetector::from_calibration(3.0, 0.5).unwrap();
        detector.train(&[29.99, 30.0, 30.01, 30.0]).unwrap();
        assert!(detector.update(40.0));

        detector.train(&[39.99, 40.0, 40.01, 40.0]).unwrap();
        detector.reset();
        let band = detector.band().unwrap();
        assert!(band.low > 39.9 && band.high < 40.1);
        assert!(!detector.update(40.0));
        assert!(detector.update(30.0));
    }

    #[test]
    fn retraining_recovers_from_zero_variance() {
        let mut detector = HysteresisDetector::from_calibration(3.0, 0.5).unwrap();
        detector.train(&[30.0; 10]).unwrap();
        assert!(!detector.needs_calibration());
        assert!(detector.band().is_none());

        detector.train(&[29.99, 30.01]).unwrap();
        assert!(detector.band().is_some());
        assert!(detector.update(31.0));
    }

    #[test]
    fn engineering_limits_ignore_calibration() {
        let mut detector = detector();
        detector.train(&[100.0, 101.0, 102.0]).unwrap();
        assert_eq!(detector.band(), Some(HysteresisBand::new(29.97, 30.02, 0.01).unwrap()));
        assert!(!detector.needs_calibration());
    }

    #[test]
    fn zero_variance_calibration_never_flags() {
        let mut detector = HysteresisDetector::from_calibration(3.0, 0.5).unwrap();
        detector.train(&[30.0; 10]).unwrap();
        assert!(!detector.update(100.0));
        assert!(!detector.update(-100.0));
    }

    #[test]
    fn rejects_inverted_band() {
        assert!(HysteresisBand::new(5.2, 4.8, 0.0).is_err());
        assert!(HysteresisBand::new(4.8, 5.2, -0.1).is_err());
    }
}
