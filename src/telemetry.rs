use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MonitorError, Result};

// SIGNAL ----------------------------------------------------------------------

/// A monitored scalar channel. Carries no state, it only keys the
/// per-signal detector instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Temperature,
    Ph,
    Speed,
}

impl Signal {
    /// Feature order expected by the kernel model.
    pub const ALL: [Signal; 3] = [Signal::Temperature, Signal::Ph, Signal::Speed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Temperature => "temperature",
            Signal::Ph => "ph",
            Signal::Speed => "speed",
        }
    }

    /// Column holding this signal in telemetry CSV files.
    pub fn column(&self) -> &'static str {
        match self {
            Signal::Temperature => "temp_mean",
            Signal::Ph => "ph_mean",
            Signal::Speed => "rpm_mean",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// SAMPLE ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub signal: Signal,
}

// FAULT LABEL -----------------------------------------------------------------

/// Ground-truth fault indicator as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FaultLabel {
    Flag(bool),
    Names(Vec<String>),
    Text(String),
}

impl FaultLabel {
    pub fn is_fault(&self) -> bool {
        match self {
            FaultLabel::Flag(flag) => *flag,
            FaultLabel::Names(names) => names.iter().any(|name| !is_blank_fault(name)),
            FaultLabel::Text(text) => text.split(',').any(|name| !is_blank_fault(name)),
        }
    }
}

fn is_blank_fault(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || name.eq_ignore_ascii_case("none") || name.eq_ignore_ascii_case("nan")
}

// TELEMETRY FRAME -------------------------------------------------------------

/// One periodic reading of every signal, optionally labelled with ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub ph: f64,
    pub speed: f64,
    pub fault: Option<bool>,
}

impl TelemetryFrame {
    pub fn new(timestamp: DateTime<Utc>, temperature: f64, ph: f64, speed: f64) -> Self {
        Self {
            timestamp,
            temperature,
            ph,
            speed,
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: bool) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn value(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Temperature => self.temperature,
            Signal::Ph => self.ph,
            Signal::Speed => self.speed,
        }
    }

    /// Feature vector in `Signal::ALL` order.
    pub fn features(&self) -> [f64; 3] {
        [self.temperature, self.ph, self.speed]
    }

    pub fn validate(&self) -> Result<()> {
        for signal in Signal::ALL {
            let value = self.value(signal);
            if !value.is_finite() {
                return Err(MonitorError::MalformedSample {
                    reason: format!("{} is not a finite number ({})", signal, value),
                });
            }
        }
        Ok(())
    }
}

// CSV RECORD ------------------------------------------------------------------

/// Row of a telemetry CSV file. Every field is optional so that a row with
/// a missing column is reported as malformed instead of aborting the read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: Option<f64>,
    pub temp_mean: Option<f64>,
    pub ph_mean: Option<f64>,
    pub rpm_mean: Option<f64>,
    pub faults: Option<String>,
}

impl From<&TelemetryFrame> for TelemetryRecord {
    fn from(frame: &TelemetryFrame) -> Self {
        let seconds = frame.timestamp.timestamp() as f64
            + frame.timestamp.timestamp_subsec_nanos() as f64 / 1e9;
        Self {
            timestamp: Some(seconds),
            temp_mean: Some(frame.temperature),
            ph_mean: Some(frame.ph),
            rpm_mean: Some(frame.speed),
            faults: None,
        }
    }
}

impl TryFrom<TelemetryRecord> for TelemetryFrame {
    type Error = MonitorError;

    fn try_from(record: TelemetryRecord) -> Result<Self> {
        let missing = |field: &str| MonitorError::MalformedSample {
            reason: format!("missing field '{}'", field),
        };

        let seconds = record.timestamp.ok_or_else(|| missing("timestamp"))?;
        let timestamp = timestamp_from_seconds(seconds)?;
        let frame = TelemetryFrame {
            timestamp,
            temperature: record.temp_mean.ok_or_else(|| missing("temp_mean"))?,
            ph: record.ph_mean.ok_or_else(|| missing("ph_mean"))?,
            speed: record.rpm_mean.ok_or_else(|| missing("rpm_mean"))?,
            fault: record
                .faults
                .map(|faults| FaultLabel::Text(faults).is_fault()),
        };
        frame.validate()?;
        Ok(frame)
    }
}

/// Converts fractional Unix seconds to a UTC timestamp.
pub fn timestamp_from_seconds(seconds: f64) -> Result<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(MonitorError::MalformedSample {
            reason: format!("invalid timestamp {}", seconds),
        });
    }
    let whole = seconds.trunc();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos).ok_or_else(|| {
        MonitorError::MalformedSample {
            reason: format!("timestamp {} out of range", seconds),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_label_forms() {
        assert!(FaultLabel::Flag(true).is_fault());
        assert!(!FaultLabel::Flag(false).is_fault());
        assert!(FaultLabel::Names(vec!["ph_offset".into()]).is_fault());
        assert!(!FaultLabel::Names(vec![]).is_fault());
        assert!(!FaultLabel::Text("None".into()).is_fault());
        assert!(!FaultLabel::Text(" ".into()).is_fault());
        assert!(FaultLabel::Text("therm_bias,motor_stall".into()).is_fault());
    }

    #[test]
    fn record_with_missing_column_is_malformed() {
        let record = TelemetryRecord {
            timestamp: Some(1.0),
            temp_mean: Some(30.0),
            ph_mean: None,
            rpm_mean: Some(1000.0),
            faults: None,
        };
        let err = TelemetryFrame::try_from(record).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedSample { .. }));
    }

    #[test]
    fn record_converts_to_frame() {
        let record = TelemetryRecord {
            timestamp: Some(1_700_000_000.5),
            temp_mean: Some(30.01),
            ph_mean: Some(5.0),
            rpm_mean: Some(1000.0),
            faults: Some("therm_bias".into()),
        };
        let frame = TelemetryFrame::try_from(record).unwrap();
        assert_eq!(frame.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(frame.timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(frame.fault, Some(true));
        assert_eq!(frame.features(), [30.01, 5.0, 1000.0]);
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let frame = TelemetryFrame::new(Utc::now(), f64::NAN, 5.0, 1000.0);
        assert!(frame.validate().is_err());
    }
}
