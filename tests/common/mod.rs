// Test doubles for the model channel, microphone and image service
//
// Everything here runs in-process: no NATS server, no audio hardware.

#![allow(dead_code)]

use ishu_voice::audio::{CaptureBackend, TimelineHandle};
use ishu_voice::channel::{ChannelEvent, ModelConnector, ModelLink, OutboundChannel, ServerMessage};
use ishu_voice::session::{SessionConfig, SessionDevices, SessionHandle, SessionSnapshot, VoiceSession};
use ishu_voice::{
    AudioFrame, EncodedChunk, ImageGenerator, ImageRef, OutputDriver, Result, TimelineOutput,
    VoiceError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const WAIT: Duration = Duration::from_secs(3);

/// Server end of one fake model connection
pub struct FakeServer {
    events: Option<mpsc::Sender<ChannelEvent>>,
    pub sent: Arc<Mutex<Vec<EncodedChunk>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl FakeServer {
    pub async fn send(&self, message: ServerMessage) {
        if let Some(events) = &self.events {
            let _ = events.send(ChannelEvent::Message(message)).await;
        }
    }

    pub async fn error(&self, message: &str) {
        if let Some(events) = &self.events {
            let _ = events.send(ChannelEvent::Error(message.to_string())).await;
        }
    }

    /// Close from the remote side
    pub fn hang_up(&mut self) {
        self.events = None;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

struct FakeOutbound {
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
    closed: Arc<Mutex<bool>>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait::async_trait]
impl OutboundChannel for FakeOutbound {
    async fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(VoiceError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        if let Some(close_tx) = self.close_tx.lock().unwrap().take() {
            let _ = close_tx.send(());
        }
        Ok(())
    }
}

/// Connector whose connections are driven by the test
pub struct FakeConnector {
    failures: Mutex<VecDeque<String>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            servers,
        });
        (connector, rx)
    }

    /// Make the next connect attempt fail with `message`
    pub fn fail_next(&self, message: &str) {
        self.failures.lock().unwrap().push_back(message.to_string());
    }
}

#[async_trait::async_trait]
impl ModelConnector for FakeConnector {
    async fn connect(&self) -> Result<ModelLink> {
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(VoiceError::channel(message));
        }

        let (server_tx, mut server_rx) = mpsc::channel::<ChannelEvent>(64);
        let (tx, rx) = mpsc::channel(64);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut close_rx => break,
                    event = server_rx.recv() => match event {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        let _ = self.servers.send(FakeServer {
            events: Some(server_tx),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });

        Ok(ModelLink {
            outbound: Arc::new(FakeOutbound {
                sent,
                closed,
                close_tx: Mutex::new(Some(close_tx)),
            }),
            inbound: rx,
        })
    }
}

/// Microphone that produces whatever the test pushes
pub struct FakeMic {
    deny: bool,
    feed: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    pub acquired: Arc<Mutex<bool>>,
}

/// Test side of a `FakeMic`
#[derive(Clone)]
pub struct MicControl {
    feed: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    pub acquired: Arc<Mutex<bool>>,
}

impl MicControl {
    pub async fn speak(&self, samples: usize) -> bool {
        let feed = self.feed.lock().unwrap().clone();
        match feed {
            Some(feed) => feed.send(vec![0.25; samples]).await.is_ok(),
            None => false,
        }
    }

    pub fn is_acquired(&self) -> bool {
        *self.acquired.lock().unwrap()
    }

    pub fn is_capturing(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }
}

impl FakeMic {
    pub fn new(deny: bool) -> (Self, MicControl) {
        let feed = Arc::new(Mutex::new(None));
        let acquired = Arc::new(Mutex::new(false));
        let control = MicControl {
            feed: Arc::clone(&feed),
            acquired: Arc::clone(&acquired),
        };
        (
            Self {
                deny,
                feed,
                acquired,
            },
            control,
        )
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FakeMic {
    async fn acquire(&mut self) -> Result<()> {
        if self.deny {
            return Err(VoiceError::PermissionDenied("user dismissed the prompt".into()));
        }
        *self.acquired.lock().unwrap() = true;
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.feed.lock().unwrap().take();
        Ok(())
    }

    async fn release(&mut self) {
        self.feed.lock().unwrap().take();
        *self.acquired.lock().unwrap() = false;
    }

    fn is_capturing(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// Image service answering every prompt with a URL, or failing with `error`
pub struct FakeImages {
    pub error: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            error: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            error: Some(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ImageGenerator for FakeImages {
    async fn request_image(&self, prompt: &str) -> Result<ImageRef> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.error {
            Some(error) => Err(VoiceError::ImageGeneration(error.clone())),
            None => Ok(ImageRef::Url {
                url: format!("https://img.test/{}", prompt.len()),
            }),
        }
    }
}

/// A running session wired to fakes
pub struct Harness {
    pub session: SessionHandle,
    pub connector: Arc<FakeConnector>,
    pub servers: mpsc::UnboundedReceiver<FakeServer>,
    pub mic: MicControl,
    pub timeline: TimelineHandle,
}

impl Harness {
    pub fn start(deny_mic: bool, images: Option<Arc<dyn ImageGenerator>>) -> Self {
        let (connector, servers) = FakeConnector::new();
        let (mic, control) = FakeMic::new(deny_mic);
        let output = TimelineOutput::new(24000, OutputDriver::Manual);
        let timeline = output.timeline();

        let config = SessionConfig {
            session_id: "test-session".to_string(),
            frame_size: 1024,
            ..SessionConfig::default()
        };
        let capture: Box<dyn CaptureBackend> = Box::new(mic);
        let devices = SessionDevices {
            capture: Arc::new(tokio::sync::Mutex::new(capture)),
            output: Box::new(output),
        };

        let (session, _task) = VoiceSession::spawn(config, connector.clone(), images, devices);

        Self {
            session,
            connector,
            servers,
            mic: control,
            timeline,
        }
    }

    /// Start and wait for the channel to open
    pub async fn connect(&mut self) -> FakeServer {
        self.session.start().await.unwrap();
        let server = tokio::time::timeout(WAIT, self.servers.recv())
            .await
            .expect("connect timed out")
            .expect("connector dropped");
        self.wait_for(|s| s.state == ishu_voice::SessionState::Listening)
            .await;
        server
    }

    pub async fn wait_for<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(WAIT, self.session.wait_for(predicate))
            .await
            .expect("timed out waiting for session")
            .expect("session ended")
    }

    /// Advance the playback clock by `secs`
    pub fn play(&self, secs: f64) {
        let mut timeline = self.timeline.lock();
        let frames = (secs * f64::from(timeline.sample_rate())).ceil() as u64;
        timeline.advance(frames);
    }
}

/// Encoded speech of `secs` at 24kHz
pub fn speech(secs: f64) -> EncodedChunk {
    let samples = (secs * 24000.0) as usize;
    ishu_voice::audio::encode(&AudioFrame::new(vec![0.1; samples], 24000, 1))
}
