use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{MonitorError, Result};
use crate::telemetry::{TelemetryFrame, TelemetryRecord};

// -----------------------------------------------------------------------------
// SETUP FOR THE SIMULATED SIGNALS
// -----------------------------------------------------------------------------

const TEMPERATURE_SETPOINT: f64 = 30.0;
const PH_SETPOINT: f64 = 5.0;
const SPEED_SETPOINT: f64 = 1000.0;

const TEMPERATURE_NOISE: f64 = 0.01;
const PH_NOISE: f64 = 0.05;
const SPEED_NOISE: f64 = 5.0;

const THERM_BIAS: f64 = 0.5;
const PH_DRIFT_PER_FRAME: f64 = 0.01;
const STALL_SPEED_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Temperature sensor reads a constant offset high.
    ThermBias,
    /// pH probe drifts away linearly from the start of the window.
    PhDrift,
    /// Stirrer runs at a fraction of its setpoint.
    MotorStall,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::ThermBias => "therm_bias",
            FaultKind::PhDrift => "ph_drift",
            FaultKind::MotorStall => "motor_stall",
        }
    }
}

/// Fault active for frames `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultWindow {
    pub kind: FaultKind,
    pub start: usize,
    pub end: usize,
}

impl FaultWindow {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub frames: usize,
    pub interval_ms: i64,
    pub start: DateTime<Utc>,
    pub faults: Vec<FaultWindow>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            frames: 600,
            interval_ms: 1000,
            start: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            faults: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFrame {
    pub frame: TelemetryFrame,
    pub active_faults: Vec<FaultKind>,
}

impl From<&SimulatedFrame> for TelemetryRecord {
    fn from(simulated: &SimulatedFrame) -> Self {
        let faults = if simulated.active_faults.is_empty() {
            "None".to_string()
        } else {
            simulated
                .active_faults
                .iter()
                .map(FaultKind::as_str)
                .collect::<Vec<_>>()
                .join(",")
        };
        TelemetryRecord {
            faults: Some(faults),
            ..TelemetryRecord::from(&simulated.frame)
        }
    }
}

// -----------------------------------------------------------------------------
// SIMULATING DATA
// -----------------------------------------------------------------------------

/// Generates labelled telemetry around the setpoints. The same config always
/// yields the same frames.
pub fn generate(config: &SimulationConfig) -> Result<Vec<SimulatedFrame>> {
    if config.interval_ms <= 0 {
        return Err(MonitorError::invalid_parameter(
            "interval_ms",
            format!("must be positive, got {}", config.interval_ms),
        ));
    }
    if let Some(window) = config.faults.iter().find(|w| w.start >= w.end) {
        return Err(MonitorError::invalid_parameter(
            "faults",
            format!(
                "{} window {}..{} is empty",
                window.kind.as_str(),
                window.start,
                window.end
            ),
        ));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut frames = Vec::with_capacity(config.frames);

    for index in 0..config.frames {
        let timestamp = config.start + Duration::milliseconds(config.interval_ms * index as i64);

        let mut temperature =
            TEMPERATURE_SETPOINT + rng.gen_range(-TEMPERATURE_NOISE..TEMPERATURE_NOISE);
        let mut ph = PH_SETPOINT + rng.gen_range(-PH_NOISE..PH_NOISE);
        let mut speed = SPEED_SETPOINT + rng.gen_range(-SPEED_NOISE..SPEED_NOISE);

        let mut active_faults = Vec::new();
        for window in config.faults.iter().filter(|w| w.contains(index)) {
            match window.kind {
                FaultKind::ThermBias => temperature += THERM_BIAS,
                FaultKind::PhDrift => {
                    ph += PH_DRIFT_PER_FRAME * (index - window.start + 1) as f64
                }
                FaultKind::MotorStall => speed *= STALL_SPEED_FACTOR,
            }
            if !active_faults.contains(&window.kind) {
                active_faults.push(window.kind);
            }
        }

        let frame = TelemetryFrame::new(timestamp, temperature, ph, speed)
            .with_fault(!active_faults.is_empty());
        frames.push(SimulatedFrame {
            frame,
            active_faults,
        });
    }

    Ok(frames)
}

/// Writes frames in the telemetry CSV layout read by the file runner.
pub fn write_telemetry<P: AsRef<Path>>(path: P, frames: &[SimulatedFrame]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for simulated in frames {
        writer.serialize(TelemetryRecord::from(simulated))?;
    }
    writer.flush()?;

    info!(
        path = %path.display(),
        frames = frames.len(),
        faulty = frames.iter().filter(|f| !f.active_faults.is_empty()).count(),
        "simulated telemetry written"
    );
    Ok(())
}

pub fn run<P: AsRef<Path>>(config: &SimulationConfig, output: P) -> Result<Vec<SimulatedFrame>> {
    let frames = generate(config)?;
    write_telemetry(output, &frames)?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(faults: Vec<FaultWindow>) -> SimulationConfig {
        SimulationConfig {
            frames: 200,
            faults,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn same_seed_same_frames() {
        let config = config_with(vec![]);
        assert_eq!(generate(&config).unwrap(), generate(&config).unwrap());

        let other = SimulationConfig {
            seed: 7,
            ..config.clone()
        };
        assert_ne!(generate(&config).unwrap(), generate(&other).unwrap());
    }

    #[test]
    fn clean_frames_stay_within_engineering_limits() {
        let frames = generate(&config_with(vec![])).unwrap();
        assert_eq!(frames.len(), 200);
        for simulated in &frames {
            let frame = &simulated.frame;
            assert_eq!(frame.fault, Some(false));
            assert!(frame.temperature > 29.97 && frame.temperature < 30.02);
            assert!(frame.ph > 4.8 && frame.ph < 5.2);
            assert!(frame.speed > 990.0 && frame.speed < 1110.0);
        }
        assert!(frames[1].frame.timestamp > frames[0].frame.timestamp);
    }

    #[test]
    fn injected_faults_are_labelled() {
        let frames = generate(&config_with(vec![
            FaultWindow {
                kind: FaultKind::MotorStall,
                start: 50,
                end: 60,
            },
            FaultWindow {
                kind: FaultKind::ThermBias,
                start: 55,
                end: 70,
            },
        ]))
        .unwrap();

        assert_eq!(frames[49].frame.fault, Some(false));
        assert_eq!(frames[50].active_faults, vec![FaultKind::MotorStall]);
        assert!(frames[50].frame.speed < 600.0);
        assert_eq!(
            frames[57].active_faults,
            vec![FaultKind::MotorStall, FaultKind::ThermBias]
        );
        assert!(frames[65].frame.temperature > 30.4);
        assert_eq!(frames[70].frame.fault, Some(false));

        let record = TelemetryRecord::from(&frames[57]);
        assert_eq!(record.faults.as_deref(), Some("motor_stall,therm_bias"));
        assert_eq!(
            TelemetryRecord::from(&frames[0]).faults.as_deref(),
            Some("None")
        );
    }

    #[test]
    fn empty_fault_window_is_rejected() {
        let config = config_with(vec![FaultWindow {
            kind: FaultKind::PhDrift,
            start: 10,
            end: 10,
        }]);
        assert!(matches!(
            generate(&config),
            Err(MonitorError::InvalidParameter { .. })
        ));
    }
}
