use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Appends raw data records to a file, one per line.
pub struct PacketRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl PacketRecorder {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, records: &[String]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            writeln!(self.writer, "{record}")?;
        }
        self.writer
            .flush()
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.written += records.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}
