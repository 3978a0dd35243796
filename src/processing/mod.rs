pub mod detector_bank;
pub mod detectors;
pub mod evaluation;
pub mod kernel;
