use std::fs;
use std::path::PathBuf;

use bioreactor_monitor::config::MonitorConfig;
use bioreactor_monitor::local::process_file::{self, RunOptions};
use bioreactor_monitor::local::simulate::{self, FaultKind, FaultWindow, SimulationConfig};
use bioreactor_monitor::processing::evaluation::EvaluationSummary;
use bioreactor_monitor::DetectorKind;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bioreactor-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_runs(dir: &PathBuf) -> (PathBuf, PathBuf) {
    let calibration = dir.join("calibration.csv");
    simulate::run(
        &SimulationConfig {
            seed: 1,
            frames: 600,
            ..SimulationConfig::default()
        },
        &calibration,
    )
    .unwrap();

    let faulty = dir.join("faulty.csv");
    simulate::run(
        &SimulationConfig {
            seed: 2,
            frames: 600,
            faults: vec![FaultWindow {
                kind: FaultKind::ThermBias,
                start: 300,
                end: 420,
            }],
            ..SimulationConfig::default()
        },
        &faulty,
    )
    .unwrap();

    (calibration, faulty)
}

fn write_kernel_model(dir: &PathBuf) -> PathBuf {
    // scaled by the noise amplitude, clean frames stay within distance sqrt(3)
    let path = dir.join("svm_model.json");
    fs::write(
        &path,
        r#"{
            "scaler_mean": [30.0, 5.0, 1000.0],
            "scaler_scale": [0.01, 0.05, 5.0],
            "support_vectors": [[0.0, 0.0, 0.0]],
            "dual_coef": [[1.0]],
            "intercept": [-0.5],
            "gamma": 0.05,
            "nu": 0.05,
            "features": ["temp_mean", "ph_mean", "rpm_mean"]
        }"#,
    )
    .unwrap();
    path
}

#[test]
fn calibrated_run_catches_temperature_bias() {
    let dir = scratch_dir("calibrated");
    let (calibration, faulty) = write_runs(&dir);
    let anomaly_log = dir.join("logs").join("anomalies.csv");
    let summary_path = dir.join("summary.json");

    let config = MonitorConfig {
        kernel_model: Some(write_kernel_model(&dir)),
        ..MonitorConfig::calibrated()
    };
    let report = process_file::run(
        &config,
        &RunOptions {
            input: faulty,
            calibration: Some(calibration),
            anomaly_log: Some(anomaly_log.clone()),
            summary_json: Some(summary_path.clone()),
        },
    )
    .unwrap();

    assert_eq!(report.frames_read, 600);
    assert_eq!(report.frames_processed, 600);
    assert_eq!(report.frames_skipped, 0);

    let summary = report.evaluation.summary();
    for kind in [DetectorKind::ZScore, DetectorKind::Hysteresis, DetectorKind::Kernel] {
        let metrics = summary.detectors[&kind];
        assert_eq!((metrics.tp, metrics.fp, metrics.fn_, metrics.tn), (120, 0, 0, 480), "{}", kind);
    }
    let drift = summary.detectors[&DetectorKind::SlidingWindow];
    assert!(drift.recall > 0.9, "sliding window recall {}", drift.recall);
    assert_eq!(summary.ensemble.recall, 1.0);
    assert_eq!(summary.ensemble.total, 600);

    let log = fs::read_to_string(&anomaly_log).unwrap();
    let mut lines = log.lines();
    assert_eq!(
        lines.next(),
        Some("timestamp,signal,detector,value,score,anomaly")
    );
    assert_eq!(lines.count(), report.anomalies_logged);
    assert!(log.contains(",temperature,hysteresis,"));
    assert!(log.contains(",,kernel,,"));

    let written: EvaluationSummary =
        serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(written.ensemble.tp, summary.ensemble.tp);
    assert_eq!(written.ensemble.fp, summary.ensemble.fp);
    assert_eq!(
        written.detectors.keys().collect::<Vec<_>>(),
        summary.detectors.keys().collect::<Vec<_>>()
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn engineering_limits_run_without_calibration() {
    let dir = scratch_dir("limits");
    let (_, faulty) = write_runs(&dir);

    let report = process_file::run(
        &MonitorConfig::default(),
        &RunOptions {
            input: faulty,
            anomaly_log: Some(dir.join("anomalies.csv")),
            ..RunOptions::default()
        },
    )
    .unwrap();

    let summary = report.evaluation.summary();
    let limits = summary.detectors[&DetectorKind::Hysteresis];
    assert_eq!((limits.tp, limits.fp, limits.fn_), (120, 0, 0));
    assert!(!summary.detectors.contains_key(&DetectorKind::Kernel));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn bad_rows_are_skipped_not_fatal() {
    let dir = scratch_dir("bad-rows");
    let input = dir.join("telemetry.csv");
    fs::write(
        &input,
        "timestamp,temp_mean,ph_mean,rpm_mean,faults\n\
         1700000010,30.0,5.0,1000,None\n\
         1700000005,30.0,5.0,1000,None\n\
         1700000011,30.0,,1000,None\n\
         1700000012,31.0,5.0,1000,therm_bias\n",
    )
    .unwrap();

    let report = process_file::run(
        &MonitorConfig::default(),
        &RunOptions {
            input,
            anomaly_log: Some(dir.join("anomalies.csv")),
            ..RunOptions::default()
        },
    )
    .unwrap();

    // one stale timestamp, one missing pH
    assert_eq!(report.frames_read, 4);
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.frames_skipped, 2);
    let ensemble = report.evaluation.summary().ensemble;
    assert_eq!((ensemble.tp, ensemble.tn), (1, 1));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_calibration_data_is_an_error() {
    let dir = scratch_dir("empty-calibration");
    let (_, faulty) = write_runs(&dir);
    let calibration = dir.join("header_only.csv");
    fs::write(&calibration, "timestamp,temp_mean,ph_mean,rpm_mean,faults\n").unwrap();

    let result = process_file::run(
        &MonitorConfig::calibrated(),
        &RunOptions {
            input: faulty,
            calibration: Some(calibration),
            anomaly_log: Some(dir.join("anomalies.csv")),
            ..RunOptions::default()
        },
    );
    assert!(result.is_err());

    let _ = fs::remove_dir_all(&dir);
}
