//! Real audio devices through cpal
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its
//! own thread and is torn down by a stop message.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureBackend, CaptureConfig};
use super::output::TimelineHandle;
use crate::error::{Result, VoiceError};

fn map_build_error(err: BuildStreamError) -> VoiceError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            VoiceError::PermissionDenied("input device not available".to_string())
        }
        BuildStreamError::BackendSpecific { err } => {
            let lowered = err.description.to_lowercase();
            if lowered.contains("permission") || lowered.contains("denied") {
                VoiceError::PermissionDenied(err.description)
            } else {
                VoiceError::Device(err.description)
            }
        }
        other => VoiceError::Device(other.to_string()),
    }
}

fn input_config(sample_rate: u32) -> Result<StreamConfig> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::Device("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| VoiceError::Device(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(|c| c.channels())
        .ok_or_else(|| VoiceError::Device("no suitable input config found".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

    debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "microphone config selected"
    );

    Ok(config)
}

struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamThread {
    fn close(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

/// Default microphone through cpal
pub struct MicrophoneBackend {
    config: CaptureConfig,
    stream_config: Option<StreamConfig>,
    stream: Option<StreamThread>,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Ok(Self {
            config,
            stream_config: None,
            stream: None,
        })
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn acquire(&mut self) -> Result<()> {
        if self.stream_config.is_none() {
            self.stream_config = Some(input_config(self.config.sample_rate)?);
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.stream.is_some() {
            return Err(VoiceError::Device("already capturing".to_string()));
        }
        self.acquire().await?;
        let stream_config = self
            .stream_config
            .clone()
            .ok_or_else(|| VoiceError::Device("input device not acquired".to_string()))?;

        let (tx, rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            let channels = stream_config.channels.max(1) as usize;
            let device = match cpal::default_host().default_input_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(VoiceError::Device(
                        "no input device available".to_string(),
                    )));
                    return;
                }
            };

            let stream = device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect();
                    // A full queue means the pipeline is behind; drop rather than block the callback
                    let _ = tx.try_send(mono);
                },
                |err| {
                    error!(error = %err, "audio capture error");
                },
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(VoiceError::Device(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let _ = stop_rx.recv();
            drop(stream);
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| VoiceError::Device(e.to_string()))?
            .map_err(|_| VoiceError::Device("capture thread exited early".to_string()))?;
        ready?;

        self.stream = Some(StreamThread { stop_tx, thread });
        info!("Microphone capture started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            tokio::task::spawn_blocking(move || stream.close())
                .await
                .map_err(|e| VoiceError::Device(e.to_string()))?;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    async fn release(&mut self) {
        if let Err(e) = self.stop().await {
            warn!("Failed to stop microphone on release: {}", e);
        }
        self.stream_config = None;
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Default output device rendering a timeline
pub struct SpeakerStream {
    inner: StreamThread,
}

impl SpeakerStream {
    /// Open the default output device at its own rate; the timeline is
    /// switched to that rate before the first callback
    pub async fn open(timeline: TimelineHandle) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            let opened = (|| -> Result<(cpal::Stream, u32)> {
                let device = cpal::default_host()
                    .default_output_device()
                    .ok_or_else(|| VoiceError::Device("no output device available".to_string()))?;

                let config: StreamConfig = device
                    .default_output_config()
                    .map_err(|e| VoiceError::Device(e.to_string()))?
                    .into();
                let sample_rate = config.sample_rate.0;
                let channels = config.channels as usize;
                timeline.lock().set_sample_rate(sample_rate);

                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            timeline.lock().render(data, channels);
                        },
                        |err| {
                            error!(error = %err, "audio playback error");
                        },
                        None,
                    )
                    .map_err(|e| VoiceError::Device(e.to_string()))?;
                stream
                    .play()
                    .map_err(|e| VoiceError::Device(e.to_string()))?;
                Ok((stream, sample_rate))
            })();

            match opened {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let sample_rate = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| VoiceError::Device(e.to_string()))?
            .map_err(|_| VoiceError::Device("playback thread exited early".to_string()))??;

        info!("Speaker stream opened at {}Hz", sample_rate);
        Ok(Self {
            inner: StreamThread { stop_tx, thread },
        })
    }

    pub fn close(self) {
        self.inner.close();
        info!("Speaker stream closed");
    }
}
