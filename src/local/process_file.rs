use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::processing::detector_bank::DetectorBank;
use crate::processing::evaluation::Evaluation;
use crate::processing::kernel::KernelModel;
use crate::telemetry::{TelemetryFrame, TelemetryRecord};
use crate::utils::log::{write_summary_json, AnomalyLogWriter};

const FAULTS_COLUMN: &str = "faults";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Fault-free telemetry used to fit calibrated detectors.
    pub calibration: Option<PathBuf>,
    /// Overrides the config's anomaly log path.
    pub anomaly_log: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub frames_read: usize,
    pub frames_processed: usize,
    pub frames_skipped: usize,
    pub anomalies_logged: usize,
    pub evaluation: Evaluation,
}

/// Telemetry rows that parsed into frames, plus how many were dropped.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFile {
    pub frames: Vec<TelemetryFrame>,
    pub skipped: usize,
}

/// Reads a telemetry CSV. Unparseable rows are logged and skipped. When the
/// file has a `faults` column an empty cell means "no fault".
pub fn read_telemetry<P: AsRef<Path>>(path: P) -> Result<TelemetryFile> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let labelled = reader.headers()?.iter().any(|h| h == FAULTS_COLUMN);

    let mut file = TelemetryFile::default();
    for (index, row) in reader.deserialize::<TelemetryRecord>().enumerate() {
        let parsed = row
            .map_err(MonitorError::from)
            .and_then(TelemetryFrame::try_from);
        match parsed {
            Ok(mut frame) => {
                if labelled && frame.fault.is_none() {
                    frame.fault = Some(false);
                }
                file.frames.push(frame);
            }
            Err(err) => {
                // header is line 1
                warn!(path = %path.display(), line = index + 2, %err, "skipping telemetry row");
                file.skipped += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        frames = file.frames.len(),
        skipped = file.skipped,
        labelled,
        "telemetry loaded"
    );
    Ok(file)
}

/// Builds the bank described by `config`, including its kernel model.
pub fn build_bank(config: &MonitorConfig) -> Result<DetectorBank> {
    let bank = DetectorBank::from_config(config)?;
    match &config.kernel_model {
        Some(path) => bank.with_kernel(Arc::new(KernelModel::load(path)?)),
        None => Ok(bank),
    }
}

/// Calibrates from fault-free frames only.
pub fn calibrate_from_file<P: AsRef<Path>>(bank: &mut DetectorBank, path: P) -> Result<()> {
    let calibration = read_telemetry(path)?;
    let (clean, faulty): (Vec<TelemetryFrame>, Vec<TelemetryFrame>) = calibration
        .frames
        .into_iter()
        .partition(|frame| frame.fault != Some(true));
    if !faulty.is_empty() {
        warn!(excluded = faulty.len(), "faulty frames left out of calibration");
    }
    bank.calibrate(&clean)
}

pub fn run(config: &MonitorConfig, options: &RunOptions) -> Result<RunReport> {
    let mut bank = build_bank(config)?;
    if let Some(path) = &options.calibration {
        calibrate_from_file(&mut bank, path)?;
    }

    let uncalibrated = bank.uncalibrated();
    if !uncalibrated.is_empty() {
        warn!(
            detectors = ?uncalibrated,
            "no calibration data, these detectors will not flag"
        );
    }

    let telemetry = read_telemetry(&options.input)?;
    let log_path = options.anomaly_log.as_ref().unwrap_or(&config.anomaly_log);
    let mut anomaly_log = AnomalyLogWriter::open(log_path)?;

    let start_time = Instant::now();
    let mut rejected = 0;
    for frame in &telemetry.frames {
        match bank.process_frame(frame) {
            Ok(report) => {
                let records = report.anomaly_records();
                if !records.is_empty() {
                    anomaly_log.write_records(&records)?;
                }
            }
            Err(err @ (MonitorError::OutOfOrder { .. } | MonitorError::MalformedSample { .. })) => {
                warn!(%err, "frame rejected");
                rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }

    let report = RunReport {
        frames_read: telemetry.frames.len() + telemetry.skipped,
        frames_processed: bank.frames_processed(),
        frames_skipped: telemetry.skipped + rejected,
        anomalies_logged: anomaly_log.rows_written(),
        evaluation: bank.evaluation().clone(),
    };
    info!(
        processed = report.frames_processed,
        skipped = report.frames_skipped,
        anomalies = report.anomalies_logged,
        log = %anomaly_log.path().display(),
        elapsed = ?start_time.elapsed(),
        "telemetry run finished"
    );

    if let Some(path) = &options.summary_json {
        write_summary_json(path, &report.evaluation.summary())?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = std::env::temp_dir().join(format!("bioreactor-read-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("telemetry.csv");
        fs::write(
            &path,
            "timestamp,temp_mean,ph_mean,rpm_mean,heater_pwm,motor_pwm,acid_pwm,base_pwm,faults\n\
             1700000000,30.0,5.0,1000,0.4,0.5,0,0,None\n\
             1700000001,abc,5.0,1000,0.4,0.5,0,0,None\n\
             1700000002,30.0,nan,1000,0.4,0.5,0,0,\n\
             1700000003,30.0,5.0,1000,0.4,0.5,0,0,therm_bias\n\
             1700000004,30.0,5.0,1000,0.4,0.5,0,0,\n",
        )
        .unwrap();

        let file = read_telemetry(&path).unwrap();
        assert_eq!(file.skipped, 2);
        let labels: Vec<_> = file.frames.iter().map(|f| f.fault).collect();
        assert_eq!(labels, vec![Some(false), Some(true), Some(false)]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unlabelled_file_has_no_ground_truth() {
        let dir = std::env::temp_dir().join(format!("bioreactor-unlabelled-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("telemetry.csv");
        fs::write(&path, "timestamp,temp_mean,ph_mean,rpm_mean\n1700000000,30.0,5.0,1000\n").unwrap();

        let file = read_telemetry(&path).unwrap();
        assert_eq!(file.frames.len(), 1);
        assert_eq!(file.frames[0].fault, None);

        let _ = fs::remove_dir_all(&dir);
    }
}
