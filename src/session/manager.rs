//! Session registry

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::matcher::{DefaultMatcher, Matcher};
use crate::sanitizer::{Sanitizer, SanitizerPipeline};
use crate::storage::RecordingStore;
use crate::{Result, TapeError};

use super::state::{Session, SessionState};
use super::Mode;

/// Matcher and sanitizers every new session starts with
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    /// Initial matcher
    pub matcher: Arc<dyn Matcher>,
    /// Initial sanitizer pipeline
    pub sanitizers: SanitizerPipeline,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            matcher: Arc::new(DefaultMatcher::default()),
            sanitizers: SanitizerPipeline::new(),
        }
    }
}

/// Owns every live session
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    store: Arc<dyn RecordingStore>,
    defaults: RwLock<SessionDefaults>,
    max_sessions: usize,
    /// Slots taken against `max_sessions`, reserved before a session exists
    reserved: AtomicUsize,
}

impl SessionManager {
    /// Create a manager persisting through `store`
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordingStore>,
        defaults: SessionDefaults,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            defaults: RwLock::new(defaults),
            max_sessions,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Start a session and return its id.
    ///
    /// Record: `name` is the test id to save under (generated when absent).
    /// Playback: `name` is the recording id to load.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`ParseError` if the recording cannot be loaded,
    /// `InvalidTestName` for unsafe names, or an error if the session limit
    /// is reached
    pub async fn create(&self, mode: Mode, name: Option<&str>) -> Result<String> {
        self.create_session(mode, name, false)
            .await
            .map(|session| session.id().to_string())
    }

    /// Start a playback session, optionally letting matched entries be
    /// served again
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::create`]
    pub async fn create_playback(&self, recording_id: &str, repeatable: bool) -> Result<String> {
        self.create_session(Mode::Playback, Some(recording_id), repeatable)
            .await
            .map(|session| session.id().to_string())
    }

    async fn create_session(
        &self,
        mode: Mode,
        name: Option<&str>,
        repeatable: bool,
    ) -> Result<Arc<Session>> {
        if self.reserved.fetch_add(1, Ordering::SeqCst) >= self.max_sessions {
            self.release_slot();
            return Err(TapeError::Other(format!(
                "Session limit reached: {}",
                self.max_sessions
            )));
        }

        let created = self.open_session(mode, name, repeatable).await;
        if created.is_err() {
            self.release_slot();
        }
        created
    }

    fn release_slot(&self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }

    async fn open_session(
        &self,
        mode: Mode,
        name: Option<&str>,
        repeatable: bool,
    ) -> Result<Arc<Session>> {
        let id = Uuid::new_v4().to_string();
        let defaults = self.defaults.read().await.clone();

        let (name, state) = match mode {
            Mode::Playback => {
                let name = name.ok_or_else(|| {
                    TapeError::NotFound("playback requires a recording id".to_string())
                })?;
                validate_test_name(name)?;
                let recording = self.store.load(name)?;
                (
                    name.to_string(),
                    SessionState::playback(
                        recording,
                        defaults.matcher,
                        defaults.sanitizers,
                        repeatable,
                    ),
                )
            }
            Mode::Record | Mode::Passthrough => {
                let name = match name {
                    Some(name) => {
                        validate_test_name(name)?;
                        name.to_string()
                    }
                    None => generate_recording_id(&id),
                };
                (
                    name,
                    SessionState::recording(defaults.matcher, defaults.sanitizers),
                )
            }
        };

        let session = Arc::new(Session::new(&id, mode, &name, state));
        self.sessions.insert(id.clone(), Arc::clone(&session));

        info!("Started {} session {} ({})", mode, id, name);
        Ok(session)
    }

    /// Look up a live session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if `id` is unknown
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TapeError::SessionNotFound(id.to_string()))
    }

    /// Stop a session.
    ///
    /// A record session with `save` set hands its recording to the store and
    /// returns the recording id. Unknown or already stopped ids are a no-op.
    /// The session is closed to further captures before saving, so a record
    /// request still in flight fails instead of being dropped silently. If
    /// saving fails the session is reopened and stays registered so the
    /// caller can retry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the recording cannot be persisted
    pub async fn stop(&self, id: &str, save: bool) -> Result<Option<String>> {
        let Ok(session) = self.get(id) else {
            debug!("Stop for unknown session {} ignored", id);
            return Ok(None);
        };

        let mut state = session.lock().await;
        if state.is_closed() {
            debug!("Session {} is already stopping", id);
            return Ok(None);
        }
        state.close();

        let recording_id = if session.mode().is_record() && save {
            match self.store.save(session.name(), state.bound_recording()) {
                Ok(recording_id) => Some(recording_id),
                Err(e) => {
                    state.reopen();
                    warn!("Failed to save session {}: {}", id, e);
                    return Err(e);
                }
            }
        } else {
            None
        };
        drop(state);

        if self.sessions.remove(id).is_some() {
            self.release_slot();
        }

        match &recording_id {
            Some(saved) => info!(
                "Stopped record session {} after {:?}, saved as {}",
                id,
                session.age(),
                saved
            ),
            None => info!("Stopped {} session {}", session.mode(), id),
        }
        Ok(recording_id)
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Append a sanitizer to the defaults of future sessions
    pub async fn add_default_sanitizer(&self, sanitizer: Arc<dyn Sanitizer>) {
        self.defaults.write().await.sanitizers.push(sanitizer);
    }

    /// Replace the default matcher of future sessions
    pub async fn set_default_matcher(&self, matcher: Arc<dyn Matcher>) {
        self.defaults.write().await.matcher = matcher;
    }

    /// Drop every live session without saving. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut dropped = 0;

        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                self.release_slot();
                if session.mode().is_record() {
                    warn!("Abandoning unsaved record session {} ({})", id, session.name());
                } else {
                    debug!("Dropping {} session {}", session.mode(), id);
                }
                dropped += 1;
            }
        }

        dropped
    }
}

/// Check that a test or recording id is safe to use as a file name
///
/// # Errors
///
/// Returns error if the name is empty, too long, hidden, or could escape
/// the recording directory
pub fn validate_test_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapeError::InvalidTestName(
            "Test name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(TapeError::InvalidTestName(format!(
            "Test name too long: {} > 255",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TapeError::InvalidTestName(
            "Test name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(TapeError::InvalidTestName(
            "Test name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapeError::InvalidTestName(
            "Test name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(TapeError::InvalidTestName(
            "Test name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Generate a recording id for a record session started without a name
#[must_use]
pub fn generate_recording_id(seed: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hasher.update(timestamp.to_le_bytes());

    hex::encode(&hasher.finalize()[..16])
}
