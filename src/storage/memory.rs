//! In-process recording store

use dashmap::DashMap;

use super::RecordingStore;
use crate::recording::Recording;
use crate::{Result, TapeError};

/// Keeps recordings in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    recordings: DashMap<String, Recording>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a recording directly
    pub fn insert(&self, id: &str, recording: Recording) {
        self.recordings.insert(id.to_string(), recording);
    }

    /// Number of stored recordings
    #[must_use]
    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    /// True if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }
}

impl RecordingStore for MemoryStore {
    fn load(&self, id: &str) -> Result<Recording> {
        self.recordings
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TapeError::NotFound(id.to_string()))
    }

    fn save(&self, name: &str, recording: &Recording) -> Result<String> {
        self.recordings.insert(name.to_string(), recording.clone());
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert!(matches!(store.load("x"), Err(TapeError::NotFound(_))));

        let mut recording = Recording::new();
        recording.variables.insert("v", "1");
        assert_eq!(store.save("x", &recording).unwrap(), "x");

        assert_eq!(store.len(), 1);
        assert_eq!(store.load("x").unwrap(), recording);
    }
}
