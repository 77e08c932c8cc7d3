use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{
    AudioSource, CaptureConfig, OutputDriver, CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE,
    PLAYBACK_SAMPLE_RATE,
};
use crate::channel::NatsChannelConfig;
use crate::session::SessionConfig;

/// Persona and directive grammar sent when the channel opens
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Ishu (ঈশু), a quick-witted voice assistant.
Speak natural, fluent Bengali (বাংলা) unless the user asks for another language.
Answers are spoken aloud, so keep them short.
Reply as soon as someone addresses you as ঈশু.
When asked for a picture or image, say briefly that you are making it and include \
exactly one tag of the form [ACTION: GEN_IMAGE: <short English description>] in your reply.";

pub const DEFAULT_VOICE: &str = "Kore";

/// WAV replayed when `audio.source = "file"`
pub const DEFAULT_INPUT_FILE: &str = "config/ishu-voice.wav";

#[cfg(feature = "cpal")]
const DEFAULT_SOURCE: &str = "microphone";
#[cfg(not(feature = "cpal"))]
const DEFAULT_SOURCE: &str = "file";

#[cfg(feature = "cpal")]
const DEFAULT_OUTPUT: &str = "speaker";
#[cfg(not(feature = "cpal"))]
const DEFAULT_OUTPUT: &str = "null";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "ishu-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3400,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_size: usize,
    /// "microphone" or "file"; defaults to the microphone only when built with `cpal`
    pub source: String,
    /// WAV file replayed when `source = "file"`
    pub input_file: Option<String>,
    /// "null" or "speaker"
    pub output: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
            source: DEFAULT_SOURCE.to_string(),
            input_file: Some(DEFAULT_INPUT_FILE.to_string()),
            output: DEFAULT_OUTPUT.to_string(),
        }
    }
}

impl AudioConfig {
    pub fn capture_source(&self) -> Result<AudioSource> {
        match self.source.as_str() {
            "microphone" => Ok(AudioSource::Microphone),
            "file" => match &self.input_file {
                Some(path) => Ok(AudioSource::File(path.clone())),
                None => bail!("audio.source = \"file\" requires audio.input_file"),
            },
            other => bail!("Unknown audio source: {}", other),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.capture_sample_rate,
            channels: 1,
            realtime: true,
        }
    }

    pub fn output_driver(&self) -> Result<OutputDriver> {
        match self.output.as_str() {
            "null" => Ok(OutputDriver::Null),
            #[cfg(feature = "cpal")]
            "speaker" => Ok(OutputDriver::Speaker),
            #[cfg(not(feature = "cpal"))]
            "speaker" => bail!("audio.output = \"speaker\" requires the `cpal` feature"),
            other => bail!("Unknown audio output: {}", other),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub nats_url: String,
    pub subject_prefix: String,
    pub open_timeout_secs: u64,
    pub system_instruction: Option<String>,
    pub voice: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "voice".to_string(),
            open_timeout_secs: 10,
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            voice: Some(DEFAULT_VOICE.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub enabled: bool,
    pub subject: String,
    pub timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subject: "image.generate".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub history_limit: usize,
    pub action_log_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            history_limit: defaults.history_limit,
            action_log_limit: defaults.action_log_limit,
        }
    }
}

impl Config {
    /// Load `path` (extension optional) with an `ISHU_` environment overlay,
    /// e.g. `ISHU_CHANNEL__NATS_URL`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ISHU")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            frame_size: self.audio.frame_size,
            capture_sample_rate: self.audio.capture_sample_rate,
            playback_sample_rate: self.audio.playback_sample_rate,
            history_limit: self.session.history_limit,
            action_log_limit: self.session.action_log_limit,
            ..SessionConfig::default()
        }
    }

    pub fn channel_config(&self, session_id: &str) -> NatsChannelConfig {
        NatsChannelConfig {
            url: self.channel.nats_url.clone(),
            subject_prefix: self.channel.subject_prefix.clone(),
            session_id: session_id.to_string(),
            open_timeout: Duration::from_secs(self.channel.open_timeout_secs),
            input_sample_rate: self.audio.capture_sample_rate,
            output_sample_rate: self.audio.playback_sample_rate,
            system_instruction: self.channel.system_instruction.clone(),
            voice: self.channel.voice.clone(),
        }
    }
}
