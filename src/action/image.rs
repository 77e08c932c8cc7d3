use async_nats::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, VoiceError};

/// Where a generated image can be found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageRef {
    Url { url: String },
    Inline { mime: String, data: String },
}

impl ImageRef {
    /// Reference usable directly as an `<img src>`
    pub fn to_src(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Inline { mime, data } => format!("data:{};base64,{}", mime, data),
        }
    }
}

/// External image-generation collaborator
#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn request_image(&self, prompt: &str) -> Result<ImageRef>;
}

/// Image request sent over NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageRequestMessage {
    pub session_id: String,
    pub prompt: String,
}

/// Reply from the image service
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ImageReplyMessage {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ImageReplyMessage {
    pub fn into_image(self) -> Result<ImageRef> {
        if let Some(error) = self.error {
            return Err(VoiceError::ImageGeneration(error));
        }
        if let Some(data) = self.image_base64 {
            return Ok(ImageRef::Inline {
                mime: self.mime.unwrap_or_else(|| "image/png".to_string()),
                data,
            });
        }
        if let Some(url) = self.image_url {
            return Ok(ImageRef::Url { url });
        }
        Err(VoiceError::ImageGeneration(
            "reply carried no image".to_string(),
        ))
    }
}

/// Image generator reached through NATS request/reply
pub struct NatsImageGenerator {
    client: Client,
    subject: String,
    session_id: String,
    timeout: Duration,
}

impl NatsImageGenerator {
    pub async fn connect(
        url: &str,
        subject: String,
        session_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting image generator to NATS at {}", url);
        let client = async_nats::connect(url)
            .await
            .map_err(|e| VoiceError::ImageGeneration(e.to_string()))?;
        Ok(Self::with_client(client, subject, session_id, timeout))
    }

    pub fn with_client(client: Client, subject: String, session_id: String, timeout: Duration) -> Self {
        Self {
            client,
            subject,
            session_id,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl ImageGenerator for NatsImageGenerator {
    async fn request_image(&self, prompt: &str) -> Result<ImageRef> {
        let request = ImageRequestMessage {
            session_id: self.session_id.clone(),
            prompt: prompt.to_string(),
        };
        let payload = serde_json::to_vec(&request)?;

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| VoiceError::ImageGeneration("image request timed out".to_string()))?
        .map_err(|e| VoiceError::ImageGeneration(e.to_string()))?;

        let reply: ImageReplyMessage = serde_json::from_slice(&reply.payload)?;
        reply.into_image()
    }
}
