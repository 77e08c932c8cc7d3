use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::snapshot::{push_newest, ActionLog, SessionSnapshot, Speaker, TranscriptEntry};
use super::state::{transition, Effect, SessionEvent, SessionState};
use crate::action::{
    ActionDispatcher, ActionOutcome, DirectiveScanner, ImageGenerator, ImageRef,
};
use crate::audio::{
    codec, CaptureHandle, CapturePipeline, OutputDevice, PlaybackScheduler, SharedCaptureBackend,
    UnitId,
};
use crate::channel::{ChannelEvent, ModelConnector, ModelLink, OutboundSlot, ServerMessage};
use crate::error::{ErrorClass, Result, VoiceError};

/// User requests accepted by the session actor
#[derive(Debug)]
enum SessionCommand {
    Start,
    Stop,
    Retry,
    ReauthCompleted,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running `VoiceSession`
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Request a new conversation (Idle → Connecting)
    pub async fn start(&self) -> Result<()> {
        self.send(SessionCommand::Start).await
    }

    /// Close the channel; the session returns to Idle once it has closed
    pub async fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop).await
    }

    /// Retry after a generic error (Error → Connecting)
    pub async fn retry(&self) -> Result<()> {
        self.send(SessionCommand::Retry).await
    }

    /// Report that the user selected a new credential (AwaitingAuth → Idle)
    pub async fn reauth_completed(&self) -> Result<()> {
        self.send(SessionCommand::ReauthCompleted).await
    }

    /// Tear everything down and stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Shutdown(tx)).await?;
        rx.await.map_err(|_| VoiceError::SessionEnded)
    }

    /// Latest observable state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| VoiceError::SessionEnded)?;
        Ok(snapshot.clone())
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::SessionEnded)
    }
}

/// Devices owned by one session
pub struct SessionDevices {
    pub capture: SharedCaptureBackend,
    pub output: Box<dyn OutputDevice>,
}

/// A voice conversation: one actor task owning state, devices and channel
pub struct VoiceSession {
    config: SessionConfig,
    state: SessionState,

    connector: Arc<dyn ModelConnector>,
    connect_tx: mpsc::UnboundedSender<(u64, Result<ModelLink>)>,
    connect_rx: mpsc::UnboundedReceiver<(u64, Result<ModelLink>)>,

    /// Bumped on every open attempt and teardown; connects from older
    /// generations are discarded
    generation: u64,

    outbound: OutboundSlot,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,

    capture_backend: SharedCaptureBackend,
    capture: Option<CaptureHandle>,

    scheduler: PlaybackScheduler,
    finished_rx: mpsc::UnboundedReceiver<UnitId>,

    dispatcher: ActionDispatcher,
    outcomes_rx: mpsc::UnboundedReceiver<ActionOutcome>,
    scanner: DirectiveScanner,

    /// Text of the model turn in progress
    accumulator: String,
    history: Vec<TranscriptEntry>,
    actions: Vec<ActionLog>,
    last_image: Option<ImageRef>,
    error_message: Option<String>,

    commands: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl VoiceSession {
    /// Spawn the session actor and return its handle
    pub fn spawn(
        config: SessionConfig,
        connector: Arc<dyn ModelConnector>,
        images: Option<Arc<dyn ImageGenerator>>,
        devices: SessionDevices,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(SessionSnapshot::new(config.session_id.clone()));
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        info!("Creating voice session: {}", config.session_id);

        let session = Self {
            config,
            state: SessionState::Idle,
            connector,
            connect_tx,
            connect_rx,
            generation: 0,
            outbound: OutboundSlot::new(),
            inbound: None,
            capture_backend: devices.capture,
            capture: None,
            scheduler: PlaybackScheduler::new(devices.output, finished_tx),
            finished_rx,
            dispatcher: ActionDispatcher::new(images, outcomes_tx),
            outcomes_rx,
            scanner: DirectiveScanner::new(),
            accumulator: String::new(),
            history: Vec::new(),
            actions: Vec::new(),
            last_image: None,
            error_message: None,
            commands: commands_rx,
            snapshot_tx,
        };

        let task = tokio::spawn(session.run());
        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("Voice session {} ready", self.config.session_id);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Start) => self.handle(SessionEvent::StartRequested, None).await,
                    Some(SessionCommand::Stop) => self.handle(SessionEvent::StopRequested, None).await,
                    Some(SessionCommand::Retry) => self.handle(SessionEvent::RetryRequested, None).await,
                    Some(SessionCommand::ReauthCompleted) => {
                        self.handle(SessionEvent::ReauthCompleted, None).await
                    }
                    Some(SessionCommand::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some((generation, result)) = self.connect_rx.recv() => {
                    self.on_connect_result(generation, result).await;
                }
                event = recv_inbound(&mut self.inbound) => self.on_channel_event(event).await,
                Some(id) = self.finished_rx.recv() => {
                    if self.scheduler.on_finished(id) {
                        self.handle(SessionEvent::PlaybackDrained, None).await;
                    }
                }
                Some(outcome) = self.outcomes_rx.recv() => self.on_action_outcome(outcome).await,
            }
        }

        info!("Voice session {} stopped", self.config.session_id);
    }

    /// Apply an event and everything that follows from its effects
    async fn handle(&mut self, event: SessionEvent, reason: Option<String>) {
        let mut queue = VecDeque::from([(event, reason)]);

        while let Some((event, reason)) = queue.pop_front() {
            let from = self.state;
            let t = transition(from, &event);
            if t.is_noop(from) {
                debug!("Ignoring {:?} in {}", event, from);
                continue;
            }

            if t.next != from {
                info!("Session {}: {} -> {}", self.config.session_id, from, t.next);
            }
            self.state = t.next;
            match t.next {
                SessionState::AwaitingAuth | SessionState::Error if t.next != from => {
                    self.error_message = reason;
                }
                SessionState::Idle | SessionState::Connecting => self.error_message = None,
                _ => {}
            }

            for effect in t.effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    queue.push_back(follow_up);
                    break;
                }
            }
        }

        self.publish();
    }

    /// Execute one effect; a failure comes back as the event to apply next
    async fn run_effect(&mut self, effect: Effect) -> Option<(SessionEvent, Option<String>)> {
        match effect {
            Effect::AcquireDevices => {
                if let Err(e) = self.scheduler.acquire().await {
                    error!("Failed to acquire output device: {}", e);
                    return Some((SessionEvent::DeviceFailed, Some(e.to_string())));
                }
                let acquired = self.capture_backend.lock().await.acquire().await;
                if let Err(e) = acquired {
                    error!("Failed to acquire microphone: {}", e);
                    return Some((SessionEvent::DeviceFailed, Some(e.to_string())));
                }
                None
            }

            Effect::OpenChannel => {
                self.generation += 1;
                let generation = self.generation;
                let connector = Arc::clone(&self.connector);
                let connect_tx = self.connect_tx.clone();
                tokio::spawn(async move {
                    let result = connector.connect().await;
                    let _ = connect_tx.send((generation, result));
                });
                None
            }

            Effect::StartCapture => {
                let started = CapturePipeline::start(
                    Arc::clone(&self.capture_backend),
                    Arc::new(self.outbound.clone()),
                    self.config.capture_settings(),
                )
                .await;
                match started {
                    Ok(handle) => {
                        self.capture = Some(handle);
                        None
                    }
                    Err(e) => {
                        error!("Failed to start capture: {}", e);
                        Some((SessionEvent::DeviceFailed, Some(e.to_string())))
                    }
                }
            }

            Effect::Enqueue(frame) => {
                if let Err(e) = self.scheduler.enqueue(frame) {
                    warn!("Failed to schedule audio: {}", e);
                    if self.scheduler.is_idle() {
                        return Some((SessionEvent::PlaybackDrained, None));
                    }
                }
                None
            }

            Effect::AppendTranscript(text) => {
                self.accumulator.push_str(&text);
                for directive in self.scanner.feed(&text) {
                    if let Some(action) = self.dispatcher.dispatch(directive) {
                        let entry = ActionLog {
                            id: action.id,
                            kind: action.kind.to_string(),
                            timestamp: Utc::now(),
                            description: format!("Generating image: {}", action.argument),
                        };
                        push_newest(&mut self.actions, entry, self.config.action_log_limit);
                    }
                }
                None
            }

            Effect::FlushTurn => {
                let text = std::mem::take(&mut self.accumulator);
                self.scanner.reset();
                if !text.trim().is_empty() {
                    let entry = TranscriptEntry {
                        role: Speaker::Assistant,
                        text,
                        timestamp: Utc::now(),
                    };
                    push_newest(&mut self.history, entry, self.config.history_limit);
                }
                None
            }

            Effect::InterruptPlayback => {
                self.scheduler.interrupt();
                None
            }

            Effect::CloseChannel => {
                self.stop_capture().await;
                match self.outbound.take().await {
                    Some(outbound) => match outbound.close().await {
                        Ok(()) => None,
                        Err(e) => {
                            warn!("Channel close failed: {}", e);
                            self.inbound = None;
                            Some((SessionEvent::ChannelClosed, None))
                        }
                    },
                    None => {
                        self.inbound = None;
                        Some((SessionEvent::ChannelClosed, None))
                    }
                }
            }

            Effect::Teardown => {
                self.teardown().await;
                None
            }
        }
    }

    async fn on_connect_result(&mut self, generation: u64, result: Result<ModelLink>) {
        if generation != self.generation || self.state != SessionState::Connecting {
            debug!("Discarding stale connect result (generation {})", generation);
            if let Ok(link) = result {
                spawn_close(link.outbound);
            }
            return;
        }

        match result {
            Ok(link) => {
                self.outbound.set(link.outbound).await;
                self.inbound = Some(link.inbound);
                self.handle(SessionEvent::ChannelOpened, None).await;
            }
            Err(e) => {
                error!("Failed to open model channel: {}", e);
                self.handle(SessionEvent::ConnectFailed(e.class()), Some(e.to_string()))
                    .await;
            }
        }
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Message(message)) => self.on_server_message(message).await,
            Some(ChannelEvent::Error(message)) => {
                error!("Model channel error: {}", message);
                let class = ErrorClass::classify(&message);
                self.handle(SessionEvent::ChannelError(class), Some(message))
                    .await;
            }
            None => {
                info!("Model channel closed");
                self.inbound = None;
                self.outbound.take().await;
                self.handle(SessionEvent::ChannelClosed, None).await;
            }
        }
    }

    async fn on_server_message(&mut self, message: ServerMessage) {
        if let Some(chunk) = message.audio_chunk {
            match codec::decode_chunk(&chunk, self.config.playback_sample_rate, 1) {
                Ok(frame) => self.handle(SessionEvent::AudioChunk(frame), None).await,
                Err(e) => warn!("Dropping audio chunk: {}", e),
            }
        }
        if let Some(text) = message.transcript_fragment {
            self.handle(SessionEvent::TranscriptFragment(text), None).await;
        }
        if message.turn_complete {
            self.handle(SessionEvent::TurnComplete, None).await;
        }
        if message.interrupted {
            self.handle(SessionEvent::Interrupted, None).await;
        }
    }

    async fn on_action_outcome(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::ImageReady {
                action_id,
                prompt,
                image,
            } => {
                info!("Image ready for action {}", action_id);
                self.last_image = Some(image);
                self.update_action(&action_id, format!("Image generated: {}", prompt));
                self.publish();
            }
            ActionOutcome::ImageFailed {
                action_id,
                prompt,
                error,
            } => {
                warn!("Image generation failed for action {}: {}", action_id, error);
                self.update_action(&action_id, format!("Image failed: {}", prompt));
                self.handle(SessionEvent::ImageFailed(error.class()), Some(error.to_string()))
                    .await;
            }
        }
    }

    fn update_action(&mut self, action_id: &str, description: String) {
        match self.actions.iter_mut().find(|a| a.id == action_id) {
            Some(entry) => {
                entry.description = description;
                entry.timestamp = Utc::now();
            }
            None => {
                let entry = ActionLog {
                    id: action_id.to_string(),
                    kind: "GEN_IMAGE".to_string(),
                    timestamp: Utc::now(),
                    description,
                };
                push_newest(&mut self.actions, entry, self.config.action_log_limit);
            }
        }
    }

    async fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
    }

    /// Stop capture, silence playback, drop the channel and release devices
    async fn teardown(&mut self) {
        self.stop_capture().await;
        self.scheduler.release();

        // A close arriving from the dropped link can no longer reach us
        self.generation += 1;
        self.inbound = None;
        if let Some(outbound) = self.outbound.take().await {
            spawn_close(outbound);
        }

        self.capture_backend.lock().await.release().await;

        self.accumulator.clear();
        self.scanner.reset();

        debug!("Session {} torn down", self.config.session_id);
    }

    async fn shutdown(&mut self) {
        self.teardown().await;
        if self.state != SessionState::Idle {
            info!("Session {}: {} -> {}", self.config.session_id, self.state, SessionState::Idle);
            self.state = SessionState::Idle;
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            session_id: self.config.session_id.clone(),
            state: self.state,
            error_message: self.error_message.clone(),
            history: self.history.clone(),
            actions: self.actions.clone(),
            last_image: self.last_image.clone(),
            updated_at: Utc::now(),
        });
    }
}

async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_close(outbound: Arc<dyn crate::channel::OutboundChannel>) {
    tokio::spawn(async move {
        if let Err(e) = outbound.close().await {
            debug!("Closing dropped channel failed: {}", e);
        }
    });
}
