//! Voice session management
//!
//! This module provides the `VoiceSession` actor that manages:
//! - The lifecycle state machine (Idle, Connecting, Listening, Speaking, ...)
//! - Device acquisition and release
//! - Microphone capture into the model channel
//! - Gapless playback of synthesized speech, with barge-in
//! - Transcript history and inline action dispatch

mod config;
mod session;
mod snapshot;
mod state;

pub use config::SessionConfig;
pub use session::{SessionDevices, SessionHandle, VoiceSession};
pub use snapshot::{ActionLog, SessionSnapshot, Speaker, TranscriptEntry};
pub use state::{transition, Effect, SessionEvent, SessionState, Transition};
