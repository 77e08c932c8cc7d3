pub mod action;
pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod session;

pub use action::{
    scan, ActionDirective, ActionDispatcher, ActionKind, DirectiveScanner, ImageGenerator,
    ImageRef, NatsImageGenerator,
};
pub use audio::{
    AudioFile, AudioFrame, AudioSource, CaptureBackend, CaptureBackendFactory, CaptureConfig,
    CapturePipeline, EncodedChunk, FileBackend, OutputDevice, OutputDriver, PlaybackScheduler,
    TimelineOutput,
};
pub use channel::{
    ChannelEvent, ModelConnector, ModelLink, NatsConnector, OutboundChannel, OutboundSlot,
    ServerMessage,
};
pub use config::Config;
pub use error::{ErrorClass, Result, VoiceError};
pub use http::{create_router, AppState};
pub use session::{
    SessionConfig, SessionDevices, SessionHandle, SessionSnapshot, SessionState, VoiceSession,
};
