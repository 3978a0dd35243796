use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use crate::error::Result;
use crate::processing::detector_bank::AnomalyRecord;
use crate::processing::evaluation::EvaluationSummary;

/// Installs the global fmt subscriber. `verbose` lowers the level to DEBUG.
/// Calling it twice is harmless, the first subscriber stays.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Appends anomaly rows to a CSV file, writing the header only when the
/// file is new.
pub struct AnomalyLogWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: usize,
}

impl AnomalyLogWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        let is_new = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);

        Ok(Self {
            path,
            writer,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Writes and flushes one frame's worth of records.
    pub fn write_records(&mut self, records: &[AnomalyRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        self.rows_written += records.len();
        Ok(())
    }
}

pub fn write_summary_json<P: AsRef<Path>>(path: P, summary: &EvaluationSummary) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    info!(path = %path.display(), "evaluation summary written");
    Ok(())
}
