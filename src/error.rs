use thiserror::Error;

use crate::telemetry::Signal;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors raised while building, calibrating or feeding the monitor.
///
/// Numeric edge cases inside a detector (zero variance, missing
/// calibration) are not errors: detectors answer those with a
/// non-anomalous verdict.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse model artifact: {0}")]
    Json(#[from] serde_json::Error),

    /// Kernel model artifact is incomplete or dimensionally inconsistent
    #[error("invalid kernel model: {reason}")]
    InvalidModel { reason: String },

    /// Feature vector length does not match the loaded model
    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("malformed sample: {reason}")]
    MalformedSample { reason: String },

    #[error("sample at {got} arrived after {last}")]
    OutOfOrder {
        last: chrono::DateTime<chrono::Utc>,
        got: chrono::DateTime<chrono::Utc>,
    },

    #[error("no calibration data for signal '{signal}'")]
    EmptyCalibration { signal: Signal },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl MonitorError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }
}
