//! Proxy sessions
//!
//! A session binds one test run to a mode and a recording. The
//! [`SessionManager`] owns every live session; proxied requests find theirs
//! through the `x-recording-id` header.

mod manager;
mod state;

use std::fmt;

pub use manager::{generate_recording_id, validate_test_name, SessionDefaults, SessionManager};
pub use state::{Session, SessionState};

/// What a session does with the traffic it sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Forward upstream and capture every exchange
    Record,
    /// Answer from a stored recording, never touching the network
    Playback,
    /// Forward upstream without capturing
    Passthrough,
}

impl Mode {
    /// True for record sessions
    #[must_use]
    pub fn is_record(self) -> bool {
        self == Self::Record
    }

    /// True for playback sessions
    #[must_use]
    pub fn is_playback(self) -> bool {
        self == Self::Playback
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Record => "record",
            Self::Playback => "playback",
            Self::Passthrough => "none",
        })
    }
}
