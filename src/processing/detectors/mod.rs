pub mod baseline;
pub mod hysteresis;
pub mod sliding_window;
pub mod zscore;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

// DETECTOR COMPONENT ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[serde(rename = "zscore")]
    ZScore,
    Hysteresis,
    SlidingWindow,
    Kernel,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::ZScore,
        DetectorKind::Hysteresis,
        DetectorKind::SlidingWindow,
        DetectorKind::Kernel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::ZScore => "zscore",
            DetectorKind::Hysteresis => "hysteresis",
            DetectorKind::SlidingWindow => "sliding_window",
            DetectorKind::Kernel => "kernel",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one detector for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub is_anomaly: bool,
    /// z-score, deviation, raw value or decision score depending on the detector
    pub score: f64,
}

impl Detection {
    pub const NORMAL: Detection = Detection {
        is_anomaly: false,
        score: 0.0,
    };

    pub fn new(is_anomaly: bool, score: f64) -> Self {
        Self { is_anomaly, score }
    }
}

/// Scalar streaming detector owned by exactly one signal channel.
pub trait DetectorInstance: Send {
    fn kind(&self) -> DetectorKind;

    fn process_sample(&mut self, value: f64) -> Detection;

    /// Fits the detector from fault-free data. Detectors that take no
    /// calibration accept and ignore it.
    fn train(&mut self, _calibration: &[f64]) -> Result<()> {
        Ok(())
    }

    /// True while the detector still waits for `train` and answers every
    /// sample with the benign verdict.
    fn needs_calibration(&self) -> bool {
        false
    }

    fn reset(&mut self);
}

// BUFFER COMPONENT ------------------------------------------------------------

/// Fixed-capacity FIFO of the most recent samples. Pushing onto a full
/// buffer evicts the oldest value. Keeps a running sum so the mean is O(1).
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Vec<f64>,
    capacity: usize,
    start: usize,
    len: usize,
    sum: f64,
    evictions: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0.0; capacity],
            capacity,
            start: 0,
            len: 0,
            sum: 0.0,
            evictions: 0,
        }
    }

    pub fn add(&mut self, element: f64) {
        if self.len < self.capacity {
            let end = (self.start + self.len) % self.capacity;
            self.buffer[end] = element;
            self.len += 1;
            self.sum += element;
            return;
        }

        // Overwrite oldest
        let evicted = self.buffer[self.start];
        self.buffer[self.start] = element;
        self.start = (self.start + 1) % self.capacity;
        self.sum += element - evicted;

        // Re-sum once per full rotation to stop rounding error from accumulating
        self.evictions += 1;
        if self.evictions >= self.capacity {
            self.evictions = 0;
            self.sum = self.iter().sum();
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        if index >= self.len {
            return None;
        }
        Some(self.buffer[(self.start + index) % self.capacity])
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len).map(move |i| self.buffer[(self.start + i) % self.capacity])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
        self.sum = 0.0;
        self.evictions = 0;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.len == 0 {
            None
        } else {
            Some(self.sum / self.len as f64)
        }
    }

    /// Population standard deviation of the contents. Exactly zero when all
    /// buffered values are equal.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let (min, max) = self
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if min == max {
            return Some(0.0);
        }
        let variance = self.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.len as f64;
        Some(variance.sqrt())
    }
}
