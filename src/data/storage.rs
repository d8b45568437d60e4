//! Append-only CSV record store.
//!
//! The header is written once when bring-up succeeds; afterwards every
//! accepted round appends one `current,voltage,temperature` line and flushes
//! it, so a crash mid-run can at most lose the line being written.
use crate::data::Reading;
use crate::error::ExperimentError;
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Column names of the output file.
pub const HEADER: [&str; 3] = ["Current", "Voltage", "Temperature"];

/// Destination for the record stream of a run.
#[async_trait]
pub trait StorageWriter: Send {
    /// Start a fresh record stream with its header line.
    async fn write_header(&mut self) -> Result<(), ExperimentError>;

    /// Append one reading and make it durable before returning.
    async fn append(&mut self, reading: &Reading) -> Result<(), ExperimentError>;
}

pub struct CsvWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorageWriter for CsvWriter {
    async fn write_header(&mut self) -> Result<(), ExperimentError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = File::create(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        writer.flush()?;

        info!(path = %self.path.display(), "output file created");
        self.writer = Some(writer);
        Ok(())
    }

    async fn append(&mut self, reading: &Reading) -> Result<(), ExperimentError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            ExperimentError::Storage("record appended before header was written".to_string())
        })?;

        writer.write_record(&[
            reading.current.to_string(),
            reading.voltage.to_string(),
            reading.temperature.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

/// Parse an output file back into `(current, voltage, temperature)` rows.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<(f64, f64, f64)>, ExperimentError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |index: usize| -> Result<f64, ExperimentError> {
            let raw = record.get(index).unwrap_or_default();
            raw.parse().map_err(|_| {
                ExperimentError::Storage(format!("column {} is not a number: {:?}", index, raw))
            })
        };
        rows.push((field(0)?, field(1)?, field(2)?));
    }
    Ok(rows)
}
