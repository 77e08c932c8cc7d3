pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod output;
pub mod playback;

#[cfg(feature = "cpal")]
pub mod device;

pub use backend::{
    AudioFrame, AudioSource, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    SharedCaptureBackend, CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
};
pub use capture::{CaptureHandle, CapturePipeline, CaptureSettings, FrameAssembler, FrameSink};
pub use codec::{decode, decode_audio_data, decode_chunk, encode, EncodedChunk};
pub use file::{AudioFile, FileBackend};
pub use output::{
    FinishNotifier, OutputDevice, OutputDriver, Timeline, TimelineHandle, TimelineOutput, UnitId,
};
pub use playback::{PlaybackScheduler, PlaybackUnit};
