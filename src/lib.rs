pub mod config;
pub mod error;
pub mod local;
pub mod processing;
pub mod telemetry;
pub mod utils;

pub use config::{load_config, save_config, MonitorConfig};
pub use error::{MonitorError, Result};
pub use processing::detector_bank::{AnomalyRecord, DetectorBank, FrameReport, Verdict};
pub use processing::detectors::{Detection, DetectorInstance, DetectorKind};
pub use processing::evaluation::{ConfusionMatrix, Evaluation, Metrics, Outcome};
pub use processing::kernel::{KernelModel, KernelScorer};
pub use telemetry::{FaultLabel, Sample, Signal, TelemetryFrame};
