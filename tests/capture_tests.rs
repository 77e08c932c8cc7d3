// Capture pipeline tests: framing, stop semantics, behavior without a channel

mod common;

use common::{FakeMic, WAIT};
use ishu_voice::audio::{
    decode_chunk, CaptureBackend, CaptureConfig, CapturePipeline, CaptureSettings, FileBackend,
    FrameSink, SharedCaptureBackend,
};
use ishu_voice::channel::{OutboundChannel, OutboundSlot};
use ishu_voice::{EncodedChunk, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    chunks: Mutex<Vec<EncodedChunk>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl FrameSink for RecordingSink {
    async fn send_chunk(&self, chunk: EncodedChunk) -> Result<()> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboundChannel for RecordingSink {
    async fn send(&self, chunk: EncodedChunk) -> Result<()> {
        self.send_chunk(chunk).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn shared(backend: impl CaptureBackend + 'static) -> SharedCaptureBackend {
    let backend: Box<dyn CaptureBackend> = Box::new(backend);
    Arc::new(tokio::sync::Mutex::new(backend))
}

fn write_wav(dir: &tempfile::TempDir, samples: usize) -> PathBuf {
    let path = dir.path().join("mic.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..samples {
        writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
    }
    writer.finalize().unwrap();
    path
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn test_file_capture_delivers_whole_4096_sample_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(&dir, 10_000);

    let config = CaptureConfig {
        realtime: false,
        ..CaptureConfig::default()
    };
    let backend = shared(FileBackend::new(path, config));
    let sink = Arc::new(RecordingSink::default());

    let handle = CapturePipeline::start(backend.clone(), sink.clone(), CaptureSettings::default())
        .await
        .unwrap();

    eventually(|| sink.count() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.stop().await;

    // 10000 samples: two full frames, the 1808-sample tail is discarded
    let chunks = sink.chunks.lock().unwrap().clone();
    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        let frame = decode_chunk(chunk, 16000, 1).unwrap();
        assert_eq!(frame.samples.len(), 4096);
        assert_eq!(frame.sample_rate, 16000);
    }
    assert!(!backend.lock().await.is_capturing());
}

#[tokio::test]
async fn test_nothing_is_sent_after_stop() {
    let (mic, control) = FakeMic::new(false);
    let sink = Arc::new(RecordingSink::default());
    let settings = CaptureSettings {
        frame_size: 512,
        ..CaptureSettings::default()
    };

    let handle = CapturePipeline::start(shared(mic), sink.clone(), settings)
        .await
        .unwrap();
    assert!(handle.is_running());

    assert!(control.speak(1024).await);
    eventually(|| sink.count() == 2).await;

    handle.stop().await;
    let after_stop = sink.count();

    // The input stream is closed; nothing more can arrive
    assert!(!control.speak(4096).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.count(), after_stop);
}

#[tokio::test]
async fn test_dropping_the_handle_stops_delivery() {
    let (mic, control) = FakeMic::new(false);
    let sink = Arc::new(RecordingSink::default());

    let handle = CapturePipeline::start(shared(mic), sink.clone(), CaptureSettings::default())
        .await
        .unwrap();
    drop(handle);

    eventually(|| !control.is_capturing()).await;
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_frames_without_channel_are_dropped_not_buffered() {
    let (mic, control) = FakeMic::new(false);
    let slot = OutboundSlot::new();
    let settings = CaptureSettings {
        frame_size: 256,
        ..CaptureSettings::default()
    };

    let handle = CapturePipeline::start(shared(mic), Arc::new(slot.clone()), settings)
        .await
        .unwrap();

    // Three frames with nowhere to go
    assert!(control.speak(768).await);
    eventually(|| handle.frames_sent() == 3).await;

    let channel = Arc::new(RecordingSink::default());
    slot.set(channel.clone()).await;

    assert!(control.speak(256).await);
    eventually(|| channel.count() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(channel.count(), 1, "earlier frames were not replayed");

    handle.stop().await;
}

#[tokio::test]
async fn test_denied_microphone_fails_start() {
    let (mic, _control) = FakeMic::new(true);
    let sink = Arc::new(RecordingSink::default());

    let result = CapturePipeline::start(shared(mic), sink, CaptureSettings::default()).await;
    assert!(matches!(
        result.err(),
        Some(ishu_voice::VoiceError::PermissionDenied(_))
    ));
}
