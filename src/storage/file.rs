//! Directory-backed recording store

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::format::{from_json, to_json};
use super::{RecordingStore, RECORDING_EXTENSION};
use crate::recording::Recording;
use crate::{Result, TapeError};

/// Stores each recording as `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the recording stored under `id`
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORDING_EXTENSION}"))
    }

    /// Read a recording document from an arbitrary path
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, `ParseError` if it is
    /// not UTF-8 or not a recording, `StorageError` for other read failures
    pub fn load_path(path: &Path) -> Result<Recording> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TapeError::NotFound(path.display().to_string()))
            }
            Err(e) => {
                return Err(TapeError::StorageError(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        match String::from_utf8(bytes) {
            Ok(raw) => from_json(&raw),
            Err(e) => Err(TapeError::ParseError {
                detail: format!("recording is not valid UTF-8: {}", e.utf8_error()),
                raw: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }),
        }
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let temp_path = path.with_extension(format!("{RECORDING_EXTENSION}.tmp"));
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            e
        })
    }
}

impl RecordingStore for FileStore {
    fn load(&self, id: &str) -> Result<Recording> {
        let path = self.path_for(id);
        let recording = Self::load_path(&path).map_err(|e| match e {
            TapeError::NotFound(_) => TapeError::NotFound(id.to_string()),
            other => other,
        })?;

        debug!(
            "Loaded recording {} ({} entries) from {}",
            id,
            recording.len(),
            path.display()
        );
        Ok(recording)
    }

    fn save(&self, name: &str, recording: &Recording) -> Result<String> {
        let path = self.path_for(name);
        let contents = to_json(recording)?;

        self.write_atomic(&path, &contents).map_err(|e| {
            TapeError::StorageError(format!("Failed to write {}: {e}", path.display()))
        })?;

        info!(
            "Saved recording {} ({} entries) to {}",
            name,
            recording.len(),
            path.display()
        );
        Ok(name.to_string())
    }
}
