use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, VoiceError};

/// Capture sample rate expected by the model (16kHz mono)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate of the model's synthesized speech
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Audio sample data (normalized f32, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0], interleaved when multi-channel
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u16,
    /// Whether sources without a real-time clock (files) should be paced
    pub realtime: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: read a WAV file (headless runs and tests)
/// - Microphone: cpal default input device (feature `cpal`)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire the input device and check permission
    ///
    /// Must be idempotent; fails with `PermissionDenied` if access is refused.
    async fn acquire(&mut self) -> Result<()>;

    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive sample buffers of any size
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Release the input device
    async fn release(&mut self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture backend shared between the session (device lifetime) and the
/// capture pipeline (stream lifetime)
pub type SharedCaptureBackend = Arc<Mutex<Box<dyn CaptureBackend>>>;

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    /// Create a shareable capture backend for the given source
    pub fn create_shared(source: AudioSource, config: CaptureConfig) -> Result<SharedCaptureBackend> {
        Ok(Arc::new(Mutex::new(Self::create(source, config)?)))
    }

    /// Create a capture backend for the given source
    pub fn create(source: AudioSource, config: CaptureConfig) -> Result<Box<dyn CaptureBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "cpal"))]
                {
                    let _ = config;
                    Err(VoiceError::Device(
                        "microphone capture requires the `cpal` feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::new(path, config);
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file input (headless runs and tests)
    File(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 2400], PLAYBACK_SAMPLE_RATE, 1);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_stereo_frame_count() {
        let frame = AudioFrame::new(vec![0.0; 6], 48000, 2);
        assert_eq!(frame.frame_count(), 3);
    }

    #[test]
    fn test_zero_rate_has_no_duration() {
        let frame = AudioFrame::new(vec![0.0; 10], 0, 1);
        assert_eq!(frame.duration_secs(), 0.0);
    }

    #[test]
    fn test_capture_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000, "Default should be 16kHz");
        assert_eq!(config.channels, 1, "Default should be mono");
    }

    #[cfg(not(feature = "cpal"))]
    #[test]
    fn test_microphone_requires_feature() {
        let result = CaptureBackendFactory::create(AudioSource::Microphone, CaptureConfig::default());
        assert!(matches!(result, Err(VoiceError::Device(_))));
    }
}
