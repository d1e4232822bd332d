//! # Snapshot Sinks
//!
//! Destinations the pipeline consumer forwards every dequeued snapshot to,
//! in addition to the in-memory store.
//!
//! [`JsonLinesSink`] writes one JSON object per line so a file can be tailed
//! while a run is in progress. The encoding mirrors the serde derive on
//! [`WindowedIterationSnapshot`] and is not a stable interchange format.

use crate::snapshot::WindowedIterationSnapshot;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Consumer-side output for window snapshots
pub trait SnapshotSink: Send {
    fn write_snapshot(&mut self, snapshot: &WindowedIterationSnapshot) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends snapshots to a file as JSON lines
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonLinesSink {
    /// Create (or truncate) the output file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open snapshot output file {:?}", path))?;

        debug!("Streaming window snapshots to: {:?}", path);
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl SnapshotSink for JsonLinesSink {
    fn write_snapshot(&mut self, snapshot: &WindowedIterationSnapshot) -> Result<()> {
        serde_json::to_writer(&mut self.writer, snapshot)
            .context("Failed to encode window snapshot")?;
        self.writer.write_all(b"\n")?;
        // Final windows are the ones readers wait for; make them visible now.
        if snapshot.is_final {
            self.writer.flush()?;
        }
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))
    }
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("path", &self.path)
            .field("written", &self.written)
            .finish()
    }
}
