use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::detectors::hysteresis::{HysteresisBand, HysteresisDetector};
use super::detectors::sliding_window::SlidingWindowDetector;
use super::detectors::zscore::{ZScoreDetector, ZScoreDetectorConfig, ZScoreMode};
use super::detectors::{Detection, DetectorInstance, DetectorKind};
use super::evaluation::Evaluation;
use super::kernel::{KernelModel, KernelPrediction, KernelScorer};
use crate::config::{
    HysteresisConfig, MonitorConfig, ReferenceConfig, SignalConfig, ZScoreConfig,
};
use crate::error::{MonitorError, Result};
use crate::telemetry::{Sample, Signal, TelemetryFrame};

// -----------------------------------------------------------------------------
// OUTPUT TYPES
// -----------------------------------------------------------------------------

/// Verdict of one scalar detector for one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub signal: Signal,
    pub detector: DetectorKind,
    pub value: f64,
    pub detection: Detection,
}

/// One row of the anomaly log. Kernel rows carry no signal or value since
/// the kernel judges the whole feature vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub timestamp: DateTime<Utc>,
    pub signal: Option<Signal>,
    pub detector: DetectorKind,
    pub value: Option<f64>,
    pub score: f64,
    pub anomaly: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub timestamp: DateTime<Utc>,
    pub verdicts: Vec<Verdict>,
    pub kernel: Option<KernelPrediction>,
    pub fault: Option<bool>,
}

impl FrameReport {
    /// Whether `kind` flagged any signal of this frame.
    pub fn fired(&self, kind: DetectorKind) -> bool {
        match kind {
            DetectorKind::Kernel => self.kernel.map_or(false, |k| k.is_anomaly),
            _ => self
                .verdicts
                .iter()
                .any(|v| v.detector == kind && v.detection.is_anomaly),
        }
    }

    pub fn any_fired(&self) -> bool {
        DetectorKind::ALL.iter().any(|&kind| self.fired(kind))
    }

    /// One record per detector that fired.
    pub fn anomaly_records(&self) -> Vec<AnomalyRecord> {
        let mut records: Vec<AnomalyRecord> = self
            .verdicts
            .iter()
            .filter(|v| v.detection.is_anomaly)
            .map(|v| AnomalyRecord {
                timestamp: self.timestamp,
                signal: Some(v.signal),
                detector: v.detector,
                value: Some(v.value),
                score: v.detection.score,
                anomaly: true,
            })
            .collect();

        if let Some(kernel) = self.kernel.filter(|k| k.is_anomaly) {
            records.push(AnomalyRecord {
                timestamp: self.timestamp,
                signal: None,
                detector: DetectorKind::Kernel,
                value: None,
                score: kernel.decision,
                anomaly: true,
            });
        }
        records
    }
}

// -----------------------------------------------------------------------------
// SIGNAL CHANNEL
// -----------------------------------------------------------------------------

/// One instance of every scalar detector for a single signal.
pub struct SignalDetectors {
    signal: Signal,
    detectors: Vec<Box<dyn DetectorInstance>>,
}

impl SignalDetectors {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            detectors: Vec::new(),
        }
    }

    pub fn from_config(signal: Signal, config: &SignalConfig) -> Result<Self> {
        let mut channel = Self::new(signal);

        let zscore = match config.zscore {
            ZScoreConfig::Rolling {
                window,
                threshold,
                warmup,
            } => ZScoreDetector::new(ZScoreDetectorConfig {
                threshold,
                mode: match warmup {
                    Some(warmup) => ZScoreMode::Rolling { window, warmup },
                    None => ZScoreMode::rolling(window),
                },
            })?,
            ZScoreConfig::Fixed { threshold } => ZScoreDetector::fixed(threshold)?,
        };
        channel.add_detector(Box::new(zscore));

        let hysteresis = match config.hysteresis {
            HysteresisConfig::Limits { low, high, margin } => {
                HysteresisDetector::new(HysteresisBand::new(low, high, margin)?)
            }
            HysteresisConfig::Calibrated {
                k,
                hysteresis_factor,
            } => HysteresisDetector::from_calibration(k, hysteresis_factor)?,
        };
        channel.add_detector(Box::new(hysteresis));

        let window = &config.sliding_window;
        let sliding = match window.reference {
            ReferenceConfig::Setpoint { value, threshold } => {
                SlidingWindowDetector::with_setpoint(window.window, value, threshold, window.quorum)?
            }
            ReferenceConfig::Calibrated { k } => {
                SlidingWindowDetector::from_calibration(window.window, k, window.quorum)?
            }
        };
        channel.add_detector(Box::new(sliding));

        Ok(channel)
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn add_detector(&mut self, detector: Box<dyn DetectorInstance>) {
        self.detectors.push(detector);
    }

    pub fn train(&mut self, calibration: &[f64]) -> Result<()> {
        if calibration.is_empty() {
            return Err(MonitorError::EmptyCalibration {
                signal: self.signal,
            });
        }
        for detector in &mut self.detectors {
            detector.train(calibration)?;
        }
        info!(
            signal = %self.signal,
            samples = calibration.len(),
            "signal detectors calibrated"
        );
        Ok(())
    }

    pub fn run_detectors(&mut self, value: f64) -> Vec<Verdict> {
        let signal = self.signal;
        self.detectors
            .iter_mut()
            .map(|detector| Verdict {
                signal,
                detector: detector.kind(),
                value,
                detection: detector.process_sample(value),
            })
            .collect()
    }

    /// Kinds of detector on this signal still waiting for calibration.
    pub fn uncalibrated(&self) -> Vec<DetectorKind> {
        self.detectors
            .iter()
            .filter(|d| d.needs_calibration())
            .map(|d| d.kind())
            .collect()
    }

    pub fn reset(&mut self) {
        for detector in &mut self.detectors {
            detector.reset();
        }
    }
}

// -----------------------------------------------------------------------------
// DETECTOR BANK
// -----------------------------------------------------------------------------

/// Owns every per-signal detector, the optional kernel scorer and the
/// evaluation counters for one stream. Processes one frame completely
/// before the next is admitted.
pub struct DetectorBank {
    channels: BTreeMap<Signal, SignalDetectors>,
    kernel: Option<KernelScorer>,
    evaluation: Evaluation,
    last_timestamp: Option<DateTime<Utc>>,
    frames_processed: usize,
}

impl DetectorBank {
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            kernel: None,
            evaluation: Evaluation::new(),
            last_timestamp: None,
            frames_processed: 0,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let mut bank = Self::new();
        for signal in Signal::ALL {
            bank.add_channel(SignalDetectors::from_config(
                signal,
                config.signals.get(signal),
            )?);
        }
        Ok(bank)
    }

    pub fn add_channel(&mut self, channel: SignalDetectors) {
        self.channels.insert(channel.signal(), channel);
    }

    /// Attaches a kernel model; it must score exactly the monitored signals.
    pub fn with_kernel(mut self, model: Arc<KernelModel>) -> Result<Self> {
        if model.feature_count() != Signal::ALL.len() {
            return Err(MonitorError::invalid_model(format!(
                "model scores {} features, frames carry {}",
                model.feature_count(),
                Signal::ALL.len()
            )));
        }
        self.kernel = Some(KernelScorer::new(model));
        Ok(self)
    }

    pub fn kernel(&self) -> Option<&KernelScorer> {
        self.kernel.as_ref()
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    /// Trains every detector that needs a baseline from fault-free frames.
    pub fn calibrate(&mut self, frames: &[TelemetryFrame]) -> Result<()> {
        for frame in frames {
            frame.validate()?;
        }
        for (signal, channel) in self.channels.iter_mut() {
            let series: Vec<f64> = frames.iter().map(|f| f.value(*signal)).collect();
            channel.train(&series)?;
        }
        Ok(())
    }

    /// `(signal, detector)` pairs that will not flag until `calibrate` runs.
    pub fn uncalibrated(&self) -> Vec<(Signal, DetectorKind)> {
        self.channels
            .iter()
            .flat_map(|(signal, channel)| {
                channel
                    .uncalibrated()
                    .into_iter()
                    .map(move |kind| (*signal, kind))
            })
            .collect()
    }

    fn admit(&self, timestamp: DateTime<Utc>) -> Result<()> {
        match self.last_timestamp {
            Some(last) if timestamp < last => Err(MonitorError::OutOfOrder {
                last,
                got: timestamp,
            }),
            _ => Ok(()),
        }
    }

    /// Feeds a single sample to its signal's detectors.
    pub fn process_sample(&mut self, sample: &Sample) -> Result<Vec<Verdict>> {
        if !sample.value.is_finite() {
            return Err(MonitorError::MalformedSample {
                reason: format!("{} is not a finite number ({})", sample.signal, sample.value),
            });
        }
        self.admit(sample.timestamp)?;

        let channel = self.channels.get_mut(&sample.signal).ok_or_else(|| {
            MonitorError::MalformedSample {
                reason: format!("signal '{}' is not monitored", sample.signal),
            }
        })?;
        self.last_timestamp = Some(sample.timestamp);
        Ok(channel.run_detectors(sample.value))
    }

    /// Fans a frame out to every detector, scores it with the kernel model
    /// when one is attached, and updates the evaluation when the frame is
    /// labelled. A rejected frame leaves all state untouched.
    pub fn process_frame(&mut self, frame: &TelemetryFrame) -> Result<FrameReport> {
        frame.validate()?;
        self.admit(frame.timestamp)?;

        let mut verdicts = Vec::with_capacity(self.channels.len() * 3);
        for (signal, channel) in self.channels.iter_mut() {
            verdicts.extend(channel.run_detectors(frame.value(*signal)));
        }

        let kernel = match self.kernel.as_ref() {
            Some(scorer) => {
                let (is_anomaly, decision) = scorer.score(&frame.features())?;
                Some(KernelPrediction {
                    is_anomaly,
                    decision,
                })
            }
            None => None,
        };

        let report = FrameReport {
            timestamp: frame.timestamp,
            verdicts,
            kernel,
            fault: frame.fault,
        };

        for verdict in report.verdicts.iter().filter(|v| v.detection.is_anomaly) {
            debug!(
                signal = %verdict.signal,
                detector = %verdict.detector,
                value = verdict.value,
                score = verdict.detection.score,
                "anomaly"
            );
        }

        if let Some(actual) = frame.fault {
            for kind in [
                DetectorKind::ZScore,
                DetectorKind::Hysteresis,
                DetectorKind::SlidingWindow,
            ] {
                self.evaluation.update(kind, report.fired(kind), actual);
            }
            if report.kernel.is_some() {
                self.evaluation
                    .update(DetectorKind::Kernel, report.fired(DetectorKind::Kernel), actual);
            }
            self.evaluation.update_ensemble(report.any_fired(), actual);
        }

        self.last_timestamp = Some(frame.timestamp);
        self.frames_processed += 1;
        Ok(report)
    }

    /// Returns the bank to its just-built state, keeping calibration.
    pub fn reset(&mut self) {
        for channel in self.channels.values_mut() {
            channel.reset();
        }
        self.evaluation.reset();
        self.last_timestamp = None;
        self.frames_processed = 0;
    }
}

impl Default for DetectorBank {
    fn default() -> Self {
        Self::new()
    }
}
