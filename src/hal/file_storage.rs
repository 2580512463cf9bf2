//! Append-only session files under a data directory, plus the session journal.
//!
//! Layout:
//!
//! ```text
//! <data_dir>/
//!   sessions.jsonl            one SessionSummary per line
//!   20240301/
//!     20240301_120000.ubx     raw receiver stream for one window
//! ```
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::Storage;
use crate::errors::StorageError;
use crate::metrics::SessionSummary;

pub const JOURNAL_FILE: &str = "sessions.jsonl";

pub struct FileStorage {
    root: PathBuf,
}

/// An open session file.
pub struct SessionFile {
    path: PathBuf,
    file: File,
}

impl SessionFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    /// Read back every journaled session summary. Unparseable lines are skipped.
    pub fn read_journal(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let path = self.journal_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Journal(format!("{}: {}", path.display(), e))),
        };
        let mut out = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StorageError::Journal(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionSummary>(&line) {
                Ok(s) => out.push(s),
                Err(e) => warn!("Skipping journal line {}: {}", lineno + 1, e),
            }
        }
        Ok(out)
    }
}

impl Storage for FileStorage {
    type Handle = SessionFile;

    fn open(&mut self, name: &str) -> Result<SessionFile, StorageError> {
        let path = self.root.join(name);
        let open_err = |source| StorageError::Open {
            name: name.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;
        debug!("Opened {}", path.display());
        Ok(SessionFile { path, file })
    }

    fn exists(&self, name: &str) -> bool {
        self.root.join(name).exists()
    }

    fn write(&mut self, handle: &mut SessionFile, bytes: &[u8]) -> Result<(), StorageError> {
        handle.file.write_all(bytes).map_err(StorageError::Write)
    }

    fn flush(&mut self, handle: &mut SessionFile) -> Result<(), StorageError> {
        handle.file.flush().map_err(StorageError::Flush)?;
        handle.file.sync_data().map_err(StorageError::Flush)
    }

    fn close(&mut self, handle: SessionFile) -> Result<(), StorageError> {
        handle.file.sync_all().map_err(StorageError::Close)?;
        debug!("Closed {}", handle.path.display());
        Ok(())
    }

    fn record_summary(&mut self, summary: &SessionSummary) -> Result<(), StorageError> {
        let line =
            serde_json::to_string(summary).map_err(|e| StorageError::Journal(e.to_string()))?;
        fs::create_dir_all(&self.root).map_err(|e| StorageError::Journal(e.to_string()))?;
        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())
            .map_err(|e| StorageError::Journal(e.to_string()))?;
        writeln!(journal, "{}", line).map_err(|e| StorageError::Journal(e.to_string()))
    }
}
