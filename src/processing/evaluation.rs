use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use super::detectors::DetectorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "TP")]
    TruePositive,
    #[serde(rename = "TN")]
    TrueNegative,
    #[serde(rename = "FP")]
    FalsePositive,
    #[serde(rename = "FN")]
    FalseNegative,
}

impl Outcome {
    pub fn classify(predicted: bool, actual: bool) -> Self {
        match (predicted, actual) {
            (true, true) => Outcome::TruePositive,
            (false, false) => Outcome::TrueNegative,
            (true, false) => Outcome::FalsePositive,
            (false, true) => Outcome::FalseNegative,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::TruePositive => "TP",
            Outcome::TrueNegative => "TN",
            Outcome::FalsePositive => "FP",
            Outcome::FalseNegative => "FN",
        }
    }
}

/// Counters plus the metrics derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tp: u64,
    pub tn: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub total: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

// CONFUSION MATRIX ------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    tp: u64,
    tn: u64,
    fp: u64,
    fn_: u64,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, predicted: bool, actual: bool) -> Outcome {
        let outcome = Outcome::classify(predicted, actual);
        match outcome {
            Outcome::TruePositive => self.tp += 1,
            Outcome::TrueNegative => self.tn += 1,
            Outcome::FalsePositive => self.fp += 1,
            Outcome::FalseNegative => self.fn_ += 1,
        }
        outcome
    }

    pub fn total(&self) -> u64 {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn metrics(&self) -> Metrics {
        let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };

        let total = self.total();
        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Metrics {
            tp: self.tp,
            tn: self.tn,
            fp: self.fp,
            fn_: self.fn_,
            total,
            precision,
            recall,
            f1,
            accuracy: ratio(self.tp + self.tn, total),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Colored two-by-two table with the derived metrics underneath.
    pub fn render(&self, name: &str) -> String {
        let m = self.metrics();
        let rule = "=".repeat(50);
        let mut out = String::new();

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "CONFUSION MATRIX: {}", name.bold());
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "                  Actual Fault    No Fault");
        let _ = writeln!(
            out,
            "  Predicted Fault     {}    {}",
            format!("TP={:<6}", m.tp).green(),
            format!("FP={:<6}", m.fp).red()
        );
        let _ = writeln!(
            out,
            "  Predicted Normal    {}    {}",
            format!("FN={:<6}", m.fn_).red(),
            format!("TN={:<6}", m.tn).green()
        );
        let _ = writeln!(out, "{}", "-".repeat(50));
        let _ = writeln!(out, "  Total samples: {}", m.total);
        if m.total > 0 {
            let _ = writeln!(out, "  Accuracy:  {:.2}%", m.accuracy * 100.0);
            let _ = writeln!(out, "  Precision: {:.2}%", m.precision * 100.0);
            let _ = writeln!(out, "  Recall:    {:.2}%", m.recall * 100.0);
            let _ = writeln!(out, "  F1 Score:  {:.2}%", m.f1 * 100.0);
        }
        let _ = write!(out, "{}", rule);
        out
    }
}

// EVALUATION ------------------------------------------------------------------

/// One confusion matrix per detector kind plus the "any detector" ensemble.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    detectors: BTreeMap<DetectorKind, ConfusionMatrix>,
    ensemble: ConfusionMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub detectors: BTreeMap<DetectorKind, Metrics>,
    pub ensemble: Metrics,
}

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, kind: DetectorKind, predicted: bool, actual: bool) -> Outcome {
        self.detectors.entry(kind).or_default().update(predicted, actual)
    }

    pub fn update_ensemble(&mut self, predicted: bool, actual: bool) -> Outcome {
        self.ensemble.update(predicted, actual)
    }

    pub fn matrix(&self, kind: DetectorKind) -> Option<&ConfusionMatrix> {
        self.detectors.get(&kind)
    }

    pub fn ensemble(&self) -> &ConfusionMatrix {
        &self.ensemble
    }

    pub fn summary(&self) -> EvaluationSummary {
        EvaluationSummary {
            detectors: self
                .detectors
                .iter()
                .map(|(kind, matrix)| (*kind, matrix.metrics()))
                .collect(),
            ensemble: self.ensemble.metrics(),
        }
    }

    pub fn reset(&mut self) {
        self.detectors.clear();
        self.ensemble.reset();
    }

    pub fn print_summary(&self) {
        for (kind, matrix) in &self.detectors {
            println!("\n{}", matrix.render(kind.as_str()));
        }
        println!("\n{}", self.ensemble.render("ensemble (any detector)"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_of_each_outcome() {
        let mut matrix = ConfusionMatrix::new();
        assert_eq!(matrix.update(true, true), Outcome::TruePositive);
        assert_eq!(matrix.update(false, false), Outcome::TrueNegative);
        assert_eq!(matrix.update(true, false), Outcome::FalsePositive);
        assert_eq!(matrix.update(false, true), Outcome::FalseNegative);

        let m = matrix.metrics();
        assert_eq!((m.tp, m.tn, m.fp, m.fn_, m.total), (1, 1, 1, 1, 4));
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 0.5);
        assert_eq!(m.f1, 0.5);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn empty_matrix_has_zero_metrics() {
        let m = ConfusionMatrix::new().metrics();
        assert_eq!(m.total, 0);
        assert_eq!((m.precision, m.recall, m.f1, m.accuracy), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn no_positive_predictions() {
        let mut matrix = ConfusionMatrix::new();
        matrix.update(false, true);
        matrix.update(false, false);
        let m = matrix.metrics();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn reset_replays_identically() {
        let pairs = [(true, true), (true, false), (false, false), (true, true)];
        let mut fresh = ConfusionMatrix::new();
        let expected: Vec<_> = pairs.iter().map(|&(p, a)| fresh.update(p, a)).collect();

        let mut reused = ConfusionMatrix::new();
        reused.update(false, true);
        reused.reset();
        assert_eq!(reused, ConfusionMatrix::new());
        let replayed: Vec<_> = pairs.iter().map(|&(p, a)| reused.update(p, a)).collect();
        assert_eq!(expected, replayed);
        assert_eq!(reused.metrics(), fresh.metrics());
    }

    #[test]
    fn render_lists_counters() {
        colored::control::set_override(false);
        let mut matrix = ConfusionMatrix::new();
        matrix.update(true, true);
        let table = matrix.render("zscore");
        assert!(table.contains("CONFUSION MATRIX: zscore"));
        assert!(table.contains("TP=1"));
        assert!(table.contains("Accuracy:  100.00%"));
    }

    #[test]
    fn evaluation_tracks_detectors_separately() {
        let mut evaluation = Evaluation::new();
        evaluation.update(DetectorKind::ZScore, true, true);
        evaluation.update(DetectorKind::Hysteresis, false, true);
        evaluation.update_ensemble(true, true);

        let summary = evaluation.summary();
        assert_eq!(summary.detectors[&DetectorKind::ZScore].tp, 1);
        assert_eq!(summary.detectors[&DetectorKind::Hysteresis].fn_, 1);
        assert!(!summary.detectors.contains_key(&DetectorKind::Kernel));
        assert_eq!(summary.ensemble.recall, 1.0);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"zscore\""));
        assert!(json.contains("\"fn\":1"));

        evaluation.reset();
        assert_eq!(evaluation.summary().ensemble.total, 0);
        assert!(evaluation.matrix(DetectorKind::ZScore).is_none());
    }
}
