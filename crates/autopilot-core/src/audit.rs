//! Append-only JSONL audit log, one file per run.

use crate::events::{AuditEvent, AuditRecord};
use crate::types::Id;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Writer for `<log_dir>/<run_id>.jsonl`.
///
/// Records are flushed as soon as they are written and never rewritten.
pub struct AuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Open (or create) the log for `run_id` under `log_dir`.
    pub fn create(log_dir: &Path, run_id: &Id) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Self::open(&log_dir.join(format!("{run_id}.jsonl")))
    }

    /// Open an explicit log path in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped record.
    pub fn record(&mut self, event: &AuditEvent) -> Result<()> {
        let line = serde_json::to_string(&AuditRecord::now(event))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read every record of a log back as loosely typed JSON.
pub fn read_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let run_id = Id::from_string("run-1");
        let mut log = AuditLog::create(&dir.path().join("runs"), &run_id).unwrap();
        assert_eq!(log.path(), dir.path().join("runs/run-1.jsonl"));

        log.record(&AuditEvent::TurnStart { turn: 1 }).unwrap();
        log.record(&AuditEvent::WorkerOutput {
            turn: 1,
            output: "line one\nline two".into(),
        })
        .unwrap();

        let records = read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "turn_start");
        assert_eq!(records[1]["output"], "line one\nline two");
    }

    #[test]
    fn records_are_visible_without_drop() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), &Id::new()).unwrap();
        log.record(&AuditEvent::TurnStart { turn: 1 }).unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        let run_id = Id::from_string("same");
        AuditLog::create(dir.path(), &run_id)
            .unwrap()
            .record(&AuditEvent::TurnStart { turn: 1 })
            .unwrap();
        let mut log = AuditLog::create(dir.path(), &run_id).unwrap();
        log.record(&AuditEvent::TurnStart { turn: 2 }).unwrap();
        let records = read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["turn"], 2);
    }
}
