//! Recording persistence
//!
//! A [`RecordingStore`] loads a recording by id at playback start and saves
//! a finished recording at record stop. The file store is the production
//! backend; the memory store backs tests and embedded use.

mod file;
mod format;
mod memory;

pub use file::FileStore;
pub use format::{from_json, to_json, EntryFile, RecordingFile, HEX_ENCODING};
pub use memory::MemoryStore;

use crate::recording::Recording;
use crate::Result;

/// File extension of persisted recordings
pub const RECORDING_EXTENSION: &str = "json";

/// Persistence backend for recordings
pub trait RecordingStore: Send + Sync {
    /// Load the recording stored under `id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is stored under `id`, `ParseError`
    /// (with the raw text) if the stored document is malformed
    fn load(&self, id: &str) -> Result<Recording>;

    /// Persist `recording` under `name` and return its recording id
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the recording cannot be written
    fn save(&self, name: &str, recording: &Recording) -> Result<String>;
}
