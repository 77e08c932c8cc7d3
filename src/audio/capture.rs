//! Microphone capture pipeline: fixed-size framing, encoding and forwarding

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::{AudioFrame, SharedCaptureBackend, CAPTURE_FRAME_SIZE};
use super::codec::{self, EncodedChunk};
use crate::error::Result;

/// Destination for encoded capture frames
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync {
    /// Forward one chunk; failures drop the chunk and are not retried
    async fn send_chunk(&self, chunk: EncodedChunk) -> Result<()>;
}

/// Re-chunks arbitrarily sized device buffers into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(full, self.sample_rate, 1));
        }
        frames
    }

    /// Samples waiting for the next full frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Capture pipeline configuration
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub frame_size: usize,
    pub sample_rate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_size: CAPTURE_FRAME_SIZE,
            sample_rate: super::backend::CAPTURE_SAMPLE_RATE,
        }
    }
}

pub struct CapturePipeline;

impl CapturePipeline {
    /// Start capturing from `backend` and forward encoded frames to `sink`
    ///
    /// The backend stays owned by the caller; stopping the pipeline stops the
    /// input stream, releasing the device is up to the owner.
    pub async fn start(
        backend: SharedCaptureBackend,
        sink: Arc<dyn FrameSink>,
        settings: CaptureSettings,
    ) -> Result<CaptureHandle> {
        let mut audio_rx = {
            let mut guard = backend.lock().await;
            guard.acquire().await?;
            let rx = guard.start().await?;

            info!(
                "Capture pipeline started on {} ({} samples/frame @ {}Hz)",
                guard.name(),
                settings.frame_size,
                settings.sample_rate
            );
            rx
        };

        let running = Arc::new(AtomicBool::new(true));
        let frames_sent = Arc::new(AtomicU64::new(0));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task_running = Arc::clone(&running);
        let task_frames = Arc::clone(&frames_sent);

        let task = tokio::spawn(async move {
            let mut assembler = FrameAssembler::new(settings.frame_size, settings.sample_rate);

            loop {
                let block = tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    block = audio_rx.recv() => match block {
                        Some(block) => block,
                        None => break,
                    },
                };

                for frame in assembler.push(&block) {
                    if !task_running.load(Ordering::SeqCst) {
                        break;
                    }

                    let chunk = codec::encode(&frame);
                    match sink.send_chunk(chunk).await {
                        Ok(()) => {
                            task_frames.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => debug!("Dropped capture frame: {}", e),
                    }
                }
            }

            debug!(
                "Capture loop finished ({} samples discarded)",
                assembler.pending_len()
            );

            if let Err(e) = backend.lock().await.stop().await {
                error!("Failed to stop capture backend: {}", e);
            }
        });

        Ok(CaptureHandle {
            running,
            frames_sent,
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }
}

/// Handle to a running capture pipeline
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop delivery and release the device
    ///
    /// Once this returns no further frame is encoded or sent.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture task panicked: {}", e);
            }
        }
        info!(
            "Capture pipeline stopped after {} frames",
            self.frames_sent.load(Ordering::SeqCst)
        );
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}
