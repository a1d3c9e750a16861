//! tapeproxy - record-and-playback HTTP proxy for deterministic integration tests
//!
//! Record sessions forward traffic to the real service and persist sanitized
//! request/response pairs. Playback sessions answer the same traffic from
//! those pairs without touching the network.

#![deny(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod json;
pub mod matcher;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod replay;
pub mod sanitizer;
pub mod session;
pub mod storage;

pub use error::{Result, TapeError};
