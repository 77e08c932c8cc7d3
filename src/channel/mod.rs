//! Bidirectional channel to the conversational model

mod client;
mod messages;

pub use client::{NatsChannelConfig, NatsConnector, NatsOutbound, Subjects};
pub use messages::{
    AudioFrameMessage, ChannelEvent, ModelEventMessage, ServerMessage, SessionCloseMessage,
    SessionOpenReply, SessionOpenRequest,
};

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

use crate::audio::{EncodedChunk, FrameSink};
use crate::error::Result;

/// Sending half of an open model channel
#[async_trait::async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send(&self, chunk: EncodedChunk) -> Result<()>;

    /// Close the channel; the inbound stream ends afterwards
    async fn close(&self) -> Result<()>;
}

/// An open channel: outbound sender plus the inbound event stream
pub struct ModelLink {
    pub outbound: Arc<dyn OutboundChannel>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Opens model channels
#[async_trait::async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(&self) -> Result<ModelLink>;
}

/// The currently open outbound channel, if any
///
/// Capture writes through this slot. With no channel open, frames are
/// dropped rather than queued.
#[derive(Clone, Default)]
pub struct OutboundSlot {
    inner: Arc<RwLock<Option<Arc<dyn OutboundChannel>>>>,
}

impl OutboundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, outbound: Arc<dyn OutboundChannel>) {
        *self.inner.write().await = Some(outbound);
    }

    pub async fn take(&self) -> Option<Arc<dyn OutboundChannel>> {
        self.inner.write().await.take()
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

#[async_trait::async_trait]
impl FrameSink for OutboundSlot {
    async fn send_chunk(&self, chunk: EncodedChunk) -> Result<()> {
        let outbound = self.inner.read().await.clone();
        match outbound {
            Some(outbound) => outbound.send(chunk).await,
            None => {
                trace!("No open channel; dropping frame");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<EncodedChunk>>,
    }

    #[async_trait::async_trait]
    impl OutboundChannel for Recorder {
        async fn send(&self, chunk: EncodedChunk) -> Result<()> {
            self.sent.lock().unwrap().push(chunk);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slot_drops_frames_without_channel() {
        let slot = OutboundSlot::new();
        assert!(!slot.is_open().await);
        slot.send_chunk(EncodedChunk("AAAA".into())).await.unwrap();

        let recorder = Arc::new(Recorder::default());
        slot.set(recorder.clone()).await;
        slot.send_chunk(EncodedChunk("BBBB".into())).await.unwrap();

        slot.take().await;
        slot.send_chunk(EncodedChunk("CCCC".into())).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_str(), "BBBB");
    }

    #[test]
    fn test_error_event_wins_over_payload() {
        let wire = ModelEventMessage {
            session_id: "s".into(),
            transcript: Some("hi".into()),
            error: Some("API key not valid".into()),
            ..ModelEventMessage::default()
        };
        assert_eq!(
            ChannelEvent::from(wire),
            ChannelEvent::Error("API key not valid".into())
        );
    }

    #[test]
    fn test_empty_parts_are_absent() {
        let wire: ModelEventMessage =
            serde_json::from_str(r#"{"session_id":"s","audio":"","transcript":"","turn_complete":true}"#)
                .unwrap();
        assert_eq!(
            ChannelEvent::from(wire),
            ChannelEvent::Message(ServerMessage::turn_complete())
        );
    }
}
