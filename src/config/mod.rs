use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::processing::detectors::sliding_window::WarmupQuorum;
use crate::telemetry::Signal;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_anomaly_log")]
    pub anomaly_log: PathBuf,
    #[serde(default)]
    pub kernel_model: Option<PathBuf>,
    pub signals: SignalsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SignalsConfig {
    pub temperature: SignalConfig,
    pub ph: SignalConfig,
    pub speed: SignalConfig,
}

impl SignalsConfig {
    pub fn get(&self, signal: Signal) -> &SignalConfig {
        match signal {
            Signal::Temperature => &self.temperature,
            Signal::Ph => &self.ph,
            Signal::Speed => &self.speed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SignalConfig {
    pub zscore: ZScoreConfig,
    pub hysteresis: HysteresisConfig,
    pub sliding_window: SlidingWindowConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ZScoreConfig {
    Rolling {
        window: usize,
        threshold: f64,
        /// Defaults to ten samples, or the whole window if it is shorter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warmup: Option<usize>,
    },
    Fixed {
        threshold: f64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HysteresisConfig {
    Limits {
        low: f64,
        high: f64,
        #[serde(default)]
        margin: f64,
    },
    Calibrated {
        k: f64,
        hysteresis_factor: f64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SlidingWindowConfig {
    pub window: usize,
    #[serde(default)]
    pub quorum: WarmupQuorum,
    pub reference: ReferenceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReferenceConfig {
    Setpoint { value: f64, threshold: f64 },
    Calibrated { k: f64 },
}

fn default_anomaly_log() -> PathBuf {
    PathBuf::from("logs/anomalies.csv")
}

impl SignalConfig {
    /// Rolling z-score, absolute limits and a setpoint drift window.
    pub fn engineering_limits(low: f64, high: f64, setpoint: f64, drift_threshold: f64) -> Self {
        Self {
            zscore: ZScoreConfig::Rolling {
                window: 50,
                threshold: 2.0,
                warmup: None,
            },
            hysteresis: HysteresisConfig::Limits {
                low,
                high,
                margin: 0.0,
            },
            sliding_window: SlidingWindowConfig {
                window: 30,
                quorum: WarmupQuorum::Immediate,
                reference: ReferenceConfig::Setpoint {
                    value: setpoint,
                    threshold: drift_threshold,
                },
            },
        }
    }

    /// Every detector fitted from fault-free calibration data.
    pub fn calibrated() -> Self {
        Self {
            zscore: ZScoreConfig::Fixed { threshold: 3.0 },
            hysteresis: HysteresisConfig::Calibrated {
                k: 3.0,
                hysteresis_factor: 0.5,
            },
            sliding_window: SlidingWindowConfig {
                window: 30,
                quorum: WarmupQuorum::HalfWindow,
                reference: ReferenceConfig::Calibrated { k: 2.0 },
            },
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            anomaly_log: default_anomaly_log(),
            kernel_model: None,
            signals: SignalsConfig {
                temperature: SignalConfig::engineering_limits(29.97, 30.02, 30.0, 0.05),
                ph: SignalConfig::engineering_limits(4.8, 5.2, 5.0, 0.3),
                speed: SignalConfig::engineering_limits(990.0, 1110.0, 1000.0, 10.0),
            },
        }
    }
}

impl MonitorConfig {
    pub fn calibrated() -> Self {
        Self {
            signals: SignalsConfig {
                temperature: SignalConfig::calibrated(),
                ph: SignalConfig::calibrated(),
                speed: SignalConfig::calibrated(),
            },
            ..Self::default()
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MonitorConfig> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&config_str)?)
}

pub fn save_config<P: AsRef<Path>>(config: &MonitorConfig, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_modes() {
        let yaml = r#"
verbose: true
kernel_model: models/svm_model.json
signals:
  temperature:
    zscore: { mode: rolling, window: 50, threshold: 2.0 }
    hysteresis: { mode: limits, low: 29.97, high: 30.02, margin: 0.01 }
    sliding_window:
      window: 30
      reference: { mode: setpoint, value: 30.0, threshold: 0.05 }
  ph:
    zscore: { mode: fixed, threshold: 3.0 }
    hysteresis: { mode: calibrated, k: 3.0, hysteresis_factor: 0.5 }
    sliding_window:
      window: 30
      quorum: half_window
      reference: { mode: calibrated, k: 2.0 }
  speed:
    zscore: { mode: rolling, window: 50, threshold: 2.0, warmup: 5 }
    hysteresis: { mode: limits, low: 990, high: 1110 }
    sliding_window:
      window: 30
      reference: { mode: setpoint, value: 1000, threshold: 10 }
"#;
        let config: MonitorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.verbose);
        assert_eq!(config.anomaly_log, PathBuf::from("logs/anomalies.csv"));
        assert_eq!(
            config.signals.temperature.zscore,
            ZScoreConfig::Rolling {
                window: 50,
                threshold: 2.0,
                warmup: None
            }
        );
        assert_eq!(
            config.signals.speed.zscore,
            ZScoreConfig::Rolling {
                window: 50,
                threshold: 2.0,
                warmup: Some(5)
            }
        );
        assert_eq!(
            config.signals.speed.hysteresis,
            HysteresisConfig::Limits {
                low: 990.0,
                high: 1110.0,
                margin: 0.0
            }
        );
        assert_eq!(config.signals.ph.sliding_window.quorum, WarmupQuorum::HalfWindow);
        assert_eq!(config.signals.temperature.sliding_window.quorum, WarmupQuorum::Immediate);
    }

    #[test]
    fn save_and_load_default() {
        let path = std::env::temp_dir().join(format!(
            "bioreactor-default-config-{}.yaml",
            std::process::id()
        ));
        let config = MonitorConfig::default();
        save_config(&config, &path).unwrap();
        let yaml = fs::read_to_string(&path).unwrap();
        assert!(!yaml.contains("warmup"));
        assert_eq!(load_config(&path).unwrap(), config);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn save_and_load_calibrated() {
        let path = std::env::temp_dir().join(format!(
            "bioreactor-config-{}.yaml",
            std::process::id()
        ));
        let config = MonitorConfig::calibrated();
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(path);
    }
}
