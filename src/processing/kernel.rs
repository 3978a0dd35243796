use rayon::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::evaluation::{ConfusionMatrix, Metrics};
use crate::error::{MonitorError, Result};

// MODEL COMPONENT -------------------------------------------------------------

/// Pretrained one-class RBF classifier together with its feature scaler.
/// Immutable once loaded; share it between scorers through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelModel {
    scaler_mean: Vec<f64>,
    scaler_scale: Vec<f64>,
    support_vectors: Vec<Vec<f64>>,
    dual_coef: Vec<f64>,
    intercept: f64,
    gamma: f64,
    feature_names: Vec<String>,
    nu: Option<f64>,
}

/// On-disk layout. Coefficients and intercept may be exported either flat
/// or in the classifier's row form (`[[..]]`, `[x]`).
#[derive(Debug, Deserialize)]
struct KernelModelArtifact {
    scaler_mean: Vec<f64>,
    scaler_scale: Vec<f64>,
    support_vectors: Vec<Vec<f64>>,
    dual_coef: Coefficients,
    intercept: Scalar,
    gamma: f64,
    #[serde(alias = "features")]
    feature_names: Vec<String>,
    #[serde(default)]
    nu: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Coefficients {
    Flat(Vec<f64>),
    Rows(Vec<Vec<f64>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Value(f64),
    List(Vec<f64>),
}

impl KernelModel {
    pub fn new(
        scaler_mean: Vec<f64>,
        scaler_scale: Vec<f64>,
        support_vectors: Vec<Vec<f64>>,
        dual_coef: Vec<f64>,
        intercept: f64,
        gamma: f64,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let model = Self {
            scaler_mean,
            scaler_scale,
            support_vectors,
            dual_coef,
            intercept,
            gamma,
            feature_names,
            nu: None,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let artifact: KernelModelArtifact = serde_json::from_str(json)?;

        let dual_coef = match artifact.dual_coef {
            Coefficients::Flat(values) => values,
            Coefficients::Rows(rows) if rows.len() == 1 => rows.into_iter().flatten().collect(),
            Coefficients::Rows(rows) => {
                return Err(MonitorError::invalid_model(format!(
                    "dual_coef must have a single row, found {}",
                    rows.len()
                )))
            }
        };
        let intercept = match artifact.intercept {
            Scalar::Value(value) => value,
            Scalar::List(values) if values.len() == 1 => values[0],
            Scalar::List(values) => {
                return Err(MonitorError::invalid_model(format!(
                    "intercept must hold one value, found {}",
                    values.len()
                )))
            }
        };

        let model = Self {
            scaler_mean: artifact.scaler_mean,
            scaler_scale: artifact.scaler_scale,
            support_vectors: artifact.support_vectors,
            dual_coef,
            intercept,
            gamma: artifact.gamma,
            feature_names: artifact.feature_names,
            nu: artifact.nu,
        };
        model.validate()?;
        Ok(model)
    }

    /// Reads and validates the whole artifact before returning; a partial or
    /// inconsistent file yields no model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let model = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            support_vectors = model.support_vector_count(),
            features = ?model.feature_names,
            gamma = model.gamma,
            "kernel model loaded"
        );
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let features = self.scaler_mean.len();
        if features == 0 {
            return Err(MonitorError::invalid_model("scaler_mean is empty"));
        }
        if self.scaler_scale.len() != features {
            return Err(MonitorError::invalid_model(format!(
                "scaler_scale has {} entries, scaler_mean has {}",
                self.scaler_scale.len(),
                features
            )));
        }
        if self.feature_names.len() != features {
            return Err(MonitorError::invalid_model(format!(
                "{} feature names for {} features",
                self.feature_names.len(),
                features
            )));
        }
        if self.support_vectors.is_empty() {
            return Err(MonitorError::invalid_model("no support vectors"));
        }
        if let Some((row, sv)) = self
            .support_vectors
            .iter()
            .enumerate()
            .find(|(_, sv)| sv.len() != features)
        {
            return Err(MonitorError::invalid_model(format!(
                "support vector {} has {} features, expected {}",
                row,
                sv.len(),
                features
            )));
        }
        if self.dual_coef.len() != self.support_vectors.len() {
            return Err(MonitorError::invalid_model(format!(
                "{} dual coefficients for {} support vectors",
                self.dual_coef.len(),
                self.support_vectors.len()
            )));
        }
        if self.scaler_scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(MonitorError::invalid_model(
                "scaler_scale entries must be finite and non-zero",
            ));
        }
        let all_finite = self.scaler_mean.iter().all(|v| v.is_finite())
            && self.dual_coef.iter().all(|v| v.is_finite())
            && self.support_vectors.iter().flatten().all(|v| v.is_finite())
            && self.intercept.is_finite();
        if !all_finite {
            return Err(MonitorError::invalid_model("non-finite model parameter"));
        }
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err(MonitorError::invalid_model(format!(
                "gamma must be finite and >= 0, got {}",
                self.gamma
            )));
        }
        Ok(())
    }

    pub fn feature_count(&self) -> usize {
        self.scaler_mean.len()
    }

    pub fn support_vector_count(&self) -> usize {
        self.support_vectors.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// `intercept + Σ dual_coef[j] · exp(-gamma · ‖x_scaled - sv[j]‖²)`
    pub fn decision(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.feature_count() {
            return Err(MonitorError::FeatureCount {
                expected: self.feature_count(),
                actual: features.len(),
            });
        }

        let scaled: Vec<f64> = features
            .iter()
            .zip(self.scaler_mean.iter().zip(&self.scaler_scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect();

        let decision = self
            .support_vectors
            .iter()
            .zip(&self.dual_coef)
            .fold(self.intercept, |acc, (sv, coef)| {
                let distance: f64 = scaled
                    .iter()
                    .zip(sv)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                acc + coef * (-self.gamma * distance).exp()
            });

        Ok(decision)
    }
}

// SCORER COMPONENT ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelPrediction {
    pub is_anomaly: bool,
    pub decision: f64,
}

/// Evaluates a shared kernel model and records every prediction it makes.
#[derive(Debug, Clone)]
pub struct KernelScorer {
    model: Arc<KernelModel>,
    history: Vec<KernelPrediction>,
}

impl KernelScorer {
    pub fn new(model: Arc<KernelModel>) -> Self {
        Self {
            model,
            history: Vec::new(),
        }
    }

    /// Negative decision means outside the learned normal region. Nothing
    /// is recorded.
    pub fn score(&self, features: &[f64]) -> Result<(bool, f64)> {
        let decision = self.model.decision(features)?;
        Ok((decision < 0.0, decision))
    }

    /// Like `score`, but appends the prediction to the history.
    pub fn predict(&mut self, features: &[f64]) -> Result<(bool, f64)> {
        let (is_anomaly, decision) = self.score(features)?;
        self.history.push(KernelPrediction {
            is_anomaly,
            decision,
        });
        Ok((is_anomaly, decision))
    }

    /// Scores many feature vectors in parallel without touching the history.
    pub fn score_batch(&self, batch: &[Vec<f64>]) -> Result<Vec<(bool, f64)>> {
        batch.par_iter().map(|features| self.score(features)).collect()
    }

    pub fn history(&self) -> &[KernelPrediction] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Confusion metrics of the recorded predictions against `ground_truth`.
    pub fn metrics(&self, ground_truth: &[bool]) -> Result<Metrics> {
        if ground_truth.len() != self.history.len() {
            return Err(MonitorError::invalid_parameter(
                "ground_truth",
                format!(
                    "{} labels for {} predictions",
                    ground_truth.len(),
                    self.history.len()
                ),
            ));
        }
        let mut matrix = ConfusionMatrix::new();
        for (prediction, &actual) in self.history.iter().zip(ground_truth) {
            matrix.update(prediction.is_anomaly, actual);
        }
        Ok(matrix.metrics())
    }
}
