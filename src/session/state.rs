//! Per-session state

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, MutexGuard};

use crate::matcher::{Candidate, Matcher};
use crate::recording::{CapturedRequest, CapturedResponse, Interaction, Recording};
use crate::sanitizer::{Sanitizer, SanitizerPipeline, VariableTable};
use crate::{Result, TapeError};

use super::Mode;

/// A live session
#[derive(Debug)]
pub struct Session {
    id: String,
    mode: Mode,
    name: String,
    created_at: SystemTime,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session.
    ///
    /// `name` is the test id a record session saves under, or the recording
    /// id a playback session was loaded from.
    #[must_use]
    pub fn new(id: &str, mode: Mode, name: &str, state: SessionState) -> Self {
        Self {
            id: id.to_string(),
            mode,
            name: name.to_string(),
            created_at: SystemTime::now(),
            state: Mutex::new(state),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Test id or recording id
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time since creation
    #[must_use]
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }

    /// Lock the mutable state.
    ///
    /// Never hold the guard across upstream I/O.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Mutable part of a session, guarded by the session lock
#[derive(Debug)]
pub struct SessionState {
    recording: Recording,
    /// Recorded requests with variable families collapsed, index-aligned
    /// with `recording.entries`; what the matcher sees during playback
    match_view: Vec<Interaction>,
    remaining: Vec<usize>,
    matcher: Arc<dyn Matcher>,
    sanitizers: SanitizerPipeline,
    repeatable: bool,
    closed: bool,
}

impl SessionState {
    /// State for a record session: empty recording, nothing to match
    #[must_use]
    pub fn recording(matcher: Arc<dyn Matcher>, sanitizers: SanitizerPipeline) -> Self {
        Self {
            recording: Recording::new(),
            match_view: Vec::new(),
            remaining: Vec::new(),
            matcher,
            sanitizers,
            repeatable: false,
            closed: false,
        }
    }

    /// State for a playback session: every entry starts out eligible
    #[must_use]
    pub fn playback(
        recording: Recording,
        matcher: Arc<dyn Matcher>,
        sanitizers: SanitizerPipeline,
        repeatable: bool,
    ) -> Self {
        let mut state = Self {
            remaining: (0..recording.len()).collect(),
            recording,
            match_view: Vec::new(),
            matcher,
            sanitizers,
            repeatable,
            closed: false,
        };
        state.rebuild_match_view();
        state
    }

    fn rebuild_match_view(&mut self) {
        let bases = self.sanitizers.variable_bases();
        self.match_view = self
            .recording
            .entries
            .iter()
            .map(|entry| {
                let mut request = entry.request.clone();
                VariableTable::generalize_request(&mut request, &bases);
                Interaction {
                    request,
                    response: CapturedResponse::new(entry.response.status, Vec::new()),
                }
            })
            .collect();
    }

    /// Bound recording
    #[must_use]
    pub fn bound_recording(&self) -> &Recording {
        &self.recording
    }

    /// Sanitize a captured exchange and append it to the recording
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` once the session has been closed for saving
    pub fn append(&mut self, mut interaction: Interaction) -> Result<()> {
        if self.closed {
            return Err(TapeError::SessionNotFound("session closed".to_string()));
        }
        self.sanitizers
            .sanitize_interaction(&mut interaction, &mut self.recording.variables);
        self.recording.entries.push(interaction);
        Ok(())
    }

    /// Refuse further captures
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Accept captures again after a failed save
    pub fn reopen(&mut self) {
        self.closed = false;
    }

    /// Whether captures are refused
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bring a live request into the form recorded requests are matched in:
    /// sanitized against a scratch copy of the recording's variables, with
    /// variable families collapsed.
    pub fn prepare_live(&self, request: &mut CapturedRequest) {
        let mut scratch = self.recording.variables.clone();
        self.sanitizers.sanitize_request(request, &mut scratch);
        VariableTable::generalize_request(request, &self.sanitizers.variable_bases());
    }

    /// Recorded entries still eligible for matching, in recorded order
    #[must_use]
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        self.remaining
            .iter()
            .map(|&index| Candidate {
                index,
                interaction: &self.match_view[index],
            })
            .collect()
    }

    /// Number of entries still eligible
    #[must_use]
    pub fn remaining_count(&self) -> usize {
        self.remaining.len()
    }

    /// Run the matcher over the remaining entries and consume the winner
    /// unless the session is repeatable. Returns the recording index.
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` if no remaining entry answers `request`
    pub fn select(&mut self, request: &CapturedRequest) -> Result<usize> {
        let index = self.matcher.select(request, &self.candidates())?;
        if !self.repeatable {
            self.remaining.retain(|&i| i != index);
        }
        Ok(index)
    }

    /// Active sanitizers
    #[must_use]
    pub fn sanitizers(&self) -> &SanitizerPipeline {
        &self.sanitizers
    }

    /// Append a sanitizer to this session's pipeline
    pub fn add_sanitizer(&mut self, sanitizer: Arc<dyn Sanitizer>) {
        let tokenizes = sanitizer.variable().is_some();
        self.sanitizers.push(sanitizer);
        if tokenizes && !self.match_view.is_empty() {
            self.rebuild_match_view();
        }
    }

    /// Active matcher
    #[must_use]
    pub fn matcher(&self) -> &Arc<dyn Matcher> {
        &self.matcher
    }

    /// Replace this session's matcher
    pub fn set_matcher(&mut self, matcher: Arc<dyn Matcher>) {
        self.matcher = matcher;
    }

    /// Whether matched entries stay eligible
    #[must_use]
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }
}
