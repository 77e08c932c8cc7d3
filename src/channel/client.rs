use async_nats::Client;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::messages::{
    AudioFrameMessage, ChannelEvent, ModelEventMessage, SessionCloseMessage, SessionOpenReply,
    SessionOpenRequest,
};
use super::{ModelConnector, ModelLink, OutboundChannel};
use crate::audio::EncodedChunk;
use crate::error::{Result, VoiceError};

/// NATS subjects used by one session
#[derive(Debug, Clone)]
pub struct Subjects {
    pub open: String,
    pub close: String,
    pub audio: String,
    pub model: String,
}

impl Subjects {
    pub fn new(prefix: &str, session_id: &str) -> Self {
        Self {
            open: format!("{}.session.open", prefix),
            close: format!("{}.session.close", prefix),
            audio: format!("{}.audio.{}", prefix, session_id),
            model: format!("{}.model.{}", prefix, session_id),
        }
    }
}

/// Connection settings for the NATS model channel
#[derive(Debug, Clone)]
pub struct NatsChannelConfig {
    pub url: String,
    pub subject_prefix: String,
    pub session_id: String,
    pub open_timeout: Duration,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub system_instruction: Option<String>,
    pub voice: Option<String>,
}

/// Opens model sessions over NATS
pub struct NatsConnector {
    config: NatsChannelConfig,
}

impl NatsConnector {
    pub fn new(config: NatsChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ModelConnector for NatsConnector {
    async fn connect(&self) -> Result<ModelLink> {
        let config = &self.config;
        let subjects = Subjects::new(&config.subject_prefix, &config.session_id);

        info!("Connecting to NATS at {}", config.url);
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| VoiceError::channel(format!("failed to connect to NATS: {}", e)))?;

        // Subscribe before the handshake so nothing the model sends right after is lost
        let mut subscriber = client
            .subscribe(subjects.model.clone())
            .await
            .map_err(|e| VoiceError::channel(format!("failed to subscribe: {}", e)))?;

        let request = SessionOpenRequest {
            session_id: config.session_id.clone(),
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
            system_instruction: config.system_instruction.clone(),
            voice: config.voice.clone(),
        };
        let payload = serde_json::to_vec(&request)?;

        let reply = tokio::time::timeout(
            config.open_timeout,
            client.request(subjects.open.clone(), payload.into()),
        )
        .await
        .map_err(|_| VoiceError::ChannelError("session open timed out".to_string()))?
        .map_err(|e| VoiceError::channel(format!("session open failed: {}", e)))?;

        let reply: SessionOpenReply = serde_json::from_slice(&reply.payload)?;
        if !reply.ok {
            let message = reply
                .error
                .unwrap_or_else(|| "session rejected".to_string());
            return Err(VoiceError::channel(message));
        }

        info!("Model session {} opened", config.session_id);

        let (tx, rx) = mpsc::channel(256);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let session_id = config.session_id.clone();

        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    msg = subscriber.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };

                let event = match serde_json::from_slice::<ModelEventMessage>(&msg.payload) {
                    Ok(event) if event.session_id == session_id => ChannelEvent::from(event),
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Failed to parse model event: {}", e);
                        continue;
                    }
                };

                if tx.send(event).await.is_err() {
                    break;
                }
            }

            if let Err(e) = subscriber.unsubscribe().await {
                debug!("Unsubscribe after close failed: {}", e);
            }
            debug!("Model event forwarding stopped");
        });

        let outbound = NatsOutbound {
            client,
            subjects,
            session_id: config.session_id.clone(),
            sample_rate: config.input_sample_rate,
            sequence: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
        };

        Ok(ModelLink {
            outbound: Arc::new(outbound),
            inbound: rx,
        })
    }
}

/// Outbound side of a NATS model session
pub struct NatsOutbound {
    client: Client,
    subjects: Subjects,
    session_id: String,
    sample_rate: u32,
    sequence: AtomicU32,
    closed: AtomicBool,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl NatsOutbound {
    async fn publish_frame(&self, pcm: String, final_frame: bool) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let message = AudioFrameMessage {
            session_id: self.session_id.clone(),
            sequence,
            pcm,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame,
        };

        let payload = serde_json::to_vec(&message)?;
        self.client
            .publish(self.subjects.audio.clone(), payload.into())
            .await
            .map_err(|e| VoiceError::ChannelError(format!("failed to publish audio frame: {}", e)))?;

        debug!(
            "Published audio frame to {} (seq={}, final={})",
            self.subjects.audio, sequence, final_frame
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboundChannel for NatsOutbound {
    async fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::ChannelClosed);
        }
        self.publish_frame(chunk.0, false).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing model session {}", self.session_id);

        if let Err(e) = self.publish_frame(String::new(), true).await {
            error!("Failed to send final frame: {}", e);
        }

        let message = SessionCloseMessage {
            session_id: self.session_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&message)?;
        if let Err(e) = self
            .client
            .publish(self.subjects.close.clone(), payload.into())
            .await
        {
            error!("Failed to publish session close: {}", e);
        }
        if let Err(e) = self.client.flush().await {
            debug!("Flush on close failed: {}", e);
        }

        // Ends the inbound stream, which is the close event
        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_are_scoped_to_session() {
        let subjects = Subjects::new("voice", "abc");
        assert_eq!(subjects.open, "voice.session.open");
        assert_eq!(subjects.audio, "voice.audio.abc");
        assert_eq!(subjects.model, "voice.model.abc");
    }
}
