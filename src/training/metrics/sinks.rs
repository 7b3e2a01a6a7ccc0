//! Per-step metric sinks
//!
//! Trainers call [`MetricsSink::record`] once per loss term per step with a
//! strictly increasing step counter. Sinks are synchronous; a sink error
//! aborts the `fit` call that produced it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Destination for per-step loss values
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink {
    /// Sink name
    fn name(&self) -> &str;

    /// Record one named value at a global step
    fn record(&mut self, name: &str, value: f64, step: u64) -> Result<()>;

    /// Flush buffered output, called once at the end of `fit`
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One recorded metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name
    pub name: String,

    /// Metric value
    pub value: f64,

    /// Global step the value belongs to
    pub step: u64,

    /// Time the value was recorded
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    fn now(name: &str, value: f64, step: u64) -> Self {
        Self {
            name: name.to_string(),
            value,
            step,
            timestamp: Utc::now(),
        }
    }
}

/// Emits every value as a structured `tracing` event at debug level
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn record(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        tracing::debug!(metric = name, value, step, "training metric");
        Ok(())
    }
}

/// Appends one JSON object per value to a file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonLinesSink {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn record(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &MetricRecord::now(name, value, step))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every record in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    records: Arc<Mutex<Vec<MetricRecord>>>,
}

impl InMemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records so far
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Values recorded under `name`, in step order
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records()
            .into_iter()
            .filter(|record| record.name == name)
            .map(|record| record.value)
            .collect()
    }
}

impl MetricsSink for InMemorySink {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn record(&mut self, name: &str, value: f64, step: u64) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::precondition("Metric buffer lock is poisoned"))?
            .push(MetricRecord::now(name, value, step));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_sink_writes_one_object_per_line() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("metrics.jsonl");
        let mut sink = JsonLinesSink::new(&path)?;
        sink.record("generator_loss", 0.7, 1)?;
        sink.record("discriminator_loss", 1.3, 1)?;
        sink.flush()?;

        let content = std::fs::read_to_string(&path)?;
        let records: Vec<MetricRecord> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "generator_loss");
        assert_eq!(records[1].step, 1);
        assert_eq!(sink.path(), path.as_path());
        Ok(())
    }

    #[test]
    fn test_in_memory_sink_clones_share_records() -> Result<()> {
        let sink = InMemorySink::new();
        let mut writer = sink.clone();
        writer.record("loss", 0.5, 1)?;
        writer.record("loss", 0.25, 2)?;
        assert_eq!(sink.values("loss"), vec![0.5, 0.25]);
        assert_eq!(sink.records().len(), 2);
        Ok(())
    }

    #[test]
    fn test_tracing_sink_accepts_values() -> Result<()> {
        let mut sink = TracingSink;
        sink.record("loss", 1.0, 1)?;
        assert_eq!(sink.name(), "tracing");
        Ok(())
    }
}
