use serde::{Deserialize, Serialize};

use crate::audio::EncodedChunk;

/// Captured audio frame published to the model
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    pub pcm: String, // Base64-encoded PCM16LE bytes
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Handshake request opening a model session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionOpenRequest {
    pub session_id: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Handshake reply
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionOpenReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Notification that the client is leaving the session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCloseMessage {
    pub session_id: String,
    pub timestamp: String,
}

/// Event streamed back by the model, as it appears on the wire
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelEventMessage {
    pub session_id: String,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// One inbound message from the model
///
/// A single message may carry several parts; they are applied in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    pub audio_chunk: Option<EncodedChunk>,
    pub transcript_fragment: Option<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

impl ServerMessage {
    pub fn audio(chunk: EncodedChunk) -> Self {
        Self {
            audio_chunk: Some(chunk),
            ..Self::default()
        }
    }

    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            transcript_fragment: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }
}

/// Inbound side of the channel: messages and channel-level errors
///
/// The end of the inbound stream is the channel's close event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(ServerMessage),
    Error(String),
}

impl From<ModelEventMessage> for ChannelEvent {
    fn from(msg: ModelEventMessage) -> Self {
        if let Some(error) = msg.error {
            return Self::Error(error);
        }
        Self::Message(ServerMessage {
            audio_chunk: msg.audio.filter(|a| !a.is_empty()).map(EncodedChunk),
            transcript_fragment: msg.transcript.filter(|t| !t.is_empty()),
            turn_complete: msg.turn_complete,
            interrupted: msg.interrupted,
        })
    }
}
