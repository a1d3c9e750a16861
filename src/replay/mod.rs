//! Playback path: sanitize, match, restore

mod engine;

pub use engine::{PlaybackEngine, PlaybackStats};
