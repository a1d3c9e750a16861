//! Recording model and the record path

mod engine;
mod model;

pub use engine::RecordingEngine;
pub use model::{CapturedRequest, CapturedResponse, Headers, Interaction, Recording};
