// Segment rotation
// Daily segments switched at local midnight, bounded history

use chrono::{DateTime, Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only file that starts a new segment each local day
pub struct RotatingFile {
    directory: PathBuf,
    /// Name of the active segment, e.g. `honeypot_ssh.json`
    base_name: String,
    /// Rotated segments kept on disk
    retention: usize,
    file: Option<File>,
    /// Local day the active segment belongs to
    segment_date: Option<NaiveDate>,
}

impl RotatingFile {
    pub fn new(directory: &Path, base_name: &str, retention: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            base_name: base_name.to_string(),
            retention: retention.max(1),
            file: None,
            segment_date: None,
        }
    }

    /// Path of the active segment
    pub fn active_path(&self) -> PathBuf {
        self.directory.join(&self.base_name)
    }

    /// Append one line belonging to the given local day
    pub fn write_line(&mut self, day: NaiveDate, line: &[u8]) -> io::Result<()> {
        if self.file.is_none() {
            self.open()?;
        }

        if let Some(current) = self.segment_date {
            if day > current {
                self.rotate(current)?;
                self.open()?;
            }
        }
        if self.segment_date.is_none() {
            self.segment_date = Some(day);
        }

        match self.file.as_mut() {
            Some(file) => {
                file.write_all(line)?;
                file.flush()
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "segment not open")),
        }
    }

    /// Open (or reopen) the active segment; a leftover file keeps its own day
    fn open(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.active_path();

        self.segment_date = match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let modified: DateTime<Local> = meta.modified()?.into();
                Some(modified.date_naive())
            }
            _ => None,
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.file = Some(file);
        Ok(())
    }

    /// Close the active segment and move it aside under its day
    fn rotate(&mut self, day: NaiveDate) -> io::Result<()> {
        self.file = None;
        self.segment_date = None;

        let mut target = self.directory.join(format!("{}.{}", self.base_name, day.format("%Y-%m-%d")));
        let mut n = 1;
        while target.exists() {
            target = self
                .directory
                .join(format!("{}.{}.{}", self.base_name, day.format("%Y-%m-%d"), n));
            n += 1;
        }

        fs::rename(self.active_path(), &target)?;
        self.prune()
    }

    /// Delete the oldest rotated segments beyond the retention limit
    fn prune(&self) -> io::Result<()> {
        let mut segments = self.rotated_segments()?;
        if segments.len() <= self.retention {
            return Ok(());
        }

        segments.sort();
        let excess = segments.len() - self.retention;
        for path in segments.into_iter().take(excess) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Rotated segments of this file, in no particular order
    pub fn rotated_segments(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.base_name);
        let mut segments = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix(&prefix) {
                let date_part = suffix.split('.').next().unwrap_or_default();
                if NaiveDate::parse_from_str(date_part, "%Y-%m-%d").is_ok() {
                    segments.push(entry.path());
                }
            }
        }
        Ok(segments)
    }
}
