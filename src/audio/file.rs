use hound::{SampleFormat, WavReader};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{CaptureBackend, CaptureConfig};
use crate::error::{Result, VoiceError};

/// Samples pushed per read, mimicking a device callback (~20ms at 16kHz)
const READ_BLOCK: usize = 320;

/// An unreadable file is a denied capture source, anything else a device error
fn open_error(path: &Path, err: hound::Error) -> VoiceError {
    match err {
        hound::Error::IoError(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            VoiceError::PermissionDenied(format!("{}: {}", path.display(), e))
        }
        other => VoiceError::Device(format!("failed to open WAV file: {}", other)),
    }
}

/// A WAV file loaded into normalized mono samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| open_error(path, e))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| VoiceError::Device(format!("failed to read audio samples: {}", e)))?;

        let duration_seconds =
            samples.len() as f64 / (f64::from(spec.sample_rate) * f64::from(spec.channels));

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix to mono and resample (linear interpolation) to the target rate
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        if self.sample_rate == target_rate || mono.is_empty() {
            return mono;
        }

        let ratio = f64::from(self.sample_rate) / f64::from(target_rate);
        let out_len = (mono.len() as f64 / ratio).floor() as usize;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let index = pos.floor() as usize;
                let frac = (pos - index as f64) as f32;
                let a = mono[index];
                let b = mono.get(index + 1).copied().unwrap_or(a);
                a + (b - a) * frac
            })
            .collect()
    }
}

/// Capture backend that replays a WAV file as if it were a microphone
pub struct FileBackend {
    path: PathBuf,
    config: CaptureConfig,
    samples: Option<Vec<f32>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            path: path.into(),
            config,
            samples: None,
            stop_tx: None,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn acquire(&mut self) -> Result<()> {
        if self.samples.is_some() {
            return Ok(());
        }

        let file = AudioFile::open(&self.path)?;
        self.samples = Some(file.to_mono(self.config.sample_rate));
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.task.is_some() {
            return Err(VoiceError::Device("already capturing".to_string()));
        }
        self.acquire().await?;

        let samples = self.samples.clone().unwrap_or_default();
        let pace = if self.config.realtime {
            Some(Duration::from_secs_f64(
                READ_BLOCK as f64 / f64::from(self.config.sample_rate),
            ))
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(100);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            for block in samples.chunks(READ_BLOCK) {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                if tx.send(block.to_vec()).await.is_err() {
                    break;
                }
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
            }
            debug!("File capture reached end of input");
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);

        info!("File capture started: {}", self.path.display());
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("File capture stopped");
        }
        Ok(())
    }

    async fn release(&mut self) {
        let _ = self.stop().await;
        self.samples = None;
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(dir: &tempfile::TempDir, rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
        let path = dir.path().join("input.wav");
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_open_normalizes_samples() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_wav(&dir, 16000, 1, &[0, 16384, -32768]);

        let audio = AudioFile::open(&path).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_wav(&dir, 16000, 2, &[16384, 0, -16384, -16384]);

        let audio = AudioFile::open(&path).unwrap();
        assert_eq!(audio.to_mono(16000), vec![0.25, -0.5]);
    }

    #[test]
    fn test_to_mono_resamples() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_wav(&dir, 32000, 1, &[0; 3200]);

        let audio = AudioFile::open(&path).unwrap();
        assert_eq!(audio.to_mono(16000).len(), 1600);
    }

    #[tokio::test]
    async fn test_backend_streams_all_samples() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_wav(&dir, 16000, 1, &[100; 1000]);

        let config = CaptureConfig {
            realtime: false,
            ..CaptureConfig::default()
        };
        let mut backend = FileBackend::new(path, config);
        let mut rx = backend.start().await.unwrap();

        let mut total = 0;
        while let Some(block) = rx.recv().await {
            total += block.len();
        }
        assert_eq!(total, 1000);
        backend.stop().await.unwrap();
        assert!(!backend.is_capturing());
    }

    #[tokio::test]
    async fn test_missing_file_fails_acquire() {
        let mut backend = FileBackend::new("/nonexistent/input.wav", CaptureConfig::default());
        assert!(backend.acquire().await.is_err());
    }

    #[test]
    fn test_unreadable_file_is_permission_denied() {
        let path = Path::new("mic.wav");
        let denied = hound::Error::IoError(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(
            open_error(path, denied),
            VoiceError::PermissionDenied(_)
        ));

        let missing = hound::Error::IoError(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(open_error(path, missing), VoiceError::Device(_)));
        assert!(matches!(
            open_error(path, hound::Error::FormatError("no RIFF tag found")),
            VoiceError::Device(_)
        ));
    }
}
