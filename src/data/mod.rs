//! Readings and the output record store.

pub mod storage;

pub use storage::{read_records, CsvWriter, StorageWriter};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One accepted sampling round. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Supply current in amperes.
    pub current: f64,
    /// Supply voltage in volts.
    pub voltage: f64,
    /// Cell temperature in degrees Celsius.
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(current: f64, voltage: f64, temperature: f64) -> Self {
        Self {
            current,
            voltage,
            temperature,
            timestamp: Utc::now(),
        }
    }
}
