use serde::{Deserialize, Serialize};

use crate::audio::{CaptureSettings, CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-7c1e...")
    pub session_id: String,

    /// Samples per captured frame
    /// Default: 4096
    pub frame_size: usize,

    /// Capture sample rate (the model expects 16kHz mono)
    pub capture_sample_rate: u32,

    /// Sample rate of synthesized speech from the model
    pub playback_sample_rate: u32,

    /// Completed turns kept in the rolling history
    /// Default: 3
    pub history_limit: usize,

    /// Entries kept in the action log
    pub action_log_limit: usize,
}

impl SessionConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            frame_size: self.frame_size,
            sample_rate: self.capture_sample_rate,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            frame_size: CAPTURE_FRAME_SIZE,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            history_limit: 3,
            action_log_limit: 50,
        }
    }
}
