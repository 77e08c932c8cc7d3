//! Session lifecycle as a pure transition function
//!
//! `transition` never touches a device or the network. It returns the next
//! state plus the effects the actor has to carry out, in order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::AudioFrame;
use crate::error::ErrorClass;

/// Lifecycle state of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    /// Credential rejected; waiting for the user to re-authenticate
    #[serde(rename = "AUTH")]
    AwaitingAuth,
    Connecting,
    Listening,
    Speaking,
    Error,
}

impl SessionState {
    /// States with an open (or opening) channel
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::AwaitingAuth => "AUTH",
            Self::Connecting => "CONNECTING",
            Self::Listening => "LISTENING",
            Self::Speaking => "SPEAKING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Everything that can happen to a session
///
/// Inbound audio reaches the machine already decoded, so a malformed chunk
/// never produces an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StartRequested,
    ChannelOpened,
    ConnectFailed(ErrorClass),
    /// Device acquisition failed (microphone refused, no output device)
    DeviceFailed,
    AudioChunk(AudioFrame),
    TranscriptFragment(String),
    TurnComplete,
    Interrupted,
    PlaybackDrained,
    ChannelError(ErrorClass),
    ChannelClosed,
    ImageFailed(ErrorClass),
    ReauthCompleted,
    RetryRequested,
    StopRequested,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireDevices,
    OpenChannel,
    StartCapture,
    Enqueue(AudioFrame),
    AppendTranscript(String),
    FlushTurn,
    InterruptPlayback,
    CloseChannel,
    /// Stop capture, interrupt playback, drop the channel, release devices
    Teardown,
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: SessionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: SessionState) -> Self {
        Self::to(state, Vec::new())
    }

    fn fail(class: ErrorClass) -> Self {
        Self::to(failure_state(class), vec![Effect::Teardown])
    }

    /// Whether the event changed anything at all
    pub fn is_noop(&self, from: SessionState) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

fn failure_state(class: ErrorClass) -> SessionState {
    match class {
        ErrorClass::Auth => SessionState::AwaitingAuth,
        ErrorClass::Generic => SessionState::Error,
    }
}

/// Apply `event` to `state`
pub fn transition(state: SessionState, event: &SessionEvent) -> Transition {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Idle, E::StartRequested) | (S::Error, E::RetryRequested) => {
            Transition::to(S::Connecting, vec![Effect::AcquireDevices, Effect::OpenChannel])
        }

        (S::Connecting, E::ChannelOpened) => {
            Transition::to(S::Listening, vec![Effect::StartCapture])
        }
        (S::Connecting, E::ConnectFailed(class)) => Transition::fail(*class),

        (s, E::DeviceFailed) if s.is_active() => Transition::fail(ErrorClass::Generic),

        (S::Listening | S::Speaking, E::AudioChunk(frame)) => {
            Transition::to(S::Speaking, vec![Effect::Enqueue(frame.clone())])
        }
        (s @ (S::Listening | S::Speaking), E::TranscriptFragment(text)) => {
            Transition::to(s, vec![Effect::AppendTranscript(text.clone())])
        }
        (s @ (S::Listening | S::Speaking), E::TurnComplete) => {
            Transition::to(s, vec![Effect::FlushTurn])
        }
        // Barge-in returns to listening without waiting for the drain
        (S::Listening | S::Speaking, E::Interrupted) => {
            Transition::to(S::Listening, vec![Effect::InterruptPlayback])
        }
        (S::Speaking, E::PlaybackDrained) => Transition::stay(S::Listening),

        (S::Idle, E::ChannelClosed) => Transition::stay(S::Idle),
        (_, E::ChannelClosed) => Transition::to(S::Idle, vec![Effect::Teardown]),

        (_, E::ChannelError(class)) => Transition::fail(*class),

        // Only an auth-class image failure affects the session
        (_, E::ImageFailed(ErrorClass::Auth)) => Transition::fail(ErrorClass::Auth),

        (S::AwaitingAuth, E::ReauthCompleted) => Transition::stay(S::Idle),

        // Nothing is open yet, so there is no close to wait for
        (S::Connecting, E::StopRequested) => Transition::to(S::Idle, vec![Effect::Teardown]),
        (s @ (S::Listening | S::Speaking), E::StopRequested) => {
            Transition::to(s, vec![Effect::CloseChannel])
        }

        (s, _) => Transition::stay(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> AudioFrame {
        AudioFrame::new(vec![0.0; 240], 24000, 1)
    }

    #[test]
    fn test_start_connects() {
        let t = transition(SessionState::Idle, &SessionEvent::StartRequested);
        assert_eq!(t.next, SessionState::Connecting);
        assert_eq!(t.effects, vec![Effect::AcquireDevices, Effect::OpenChannel]);
    }

    #[test]
    fn test_open_starts_capture() {
        let t = transition(SessionState::Connecting, &SessionEvent::ChannelOpened);
        assert_eq!(t.next, SessionState::Listening);
        assert_eq!(t.effects, vec![Effect::StartCapture]);
    }

    #[test]
    fn test_auth_rejection_never_reaches_error() {
        let t = transition(
            SessionState::Connecting,
            &SessionEvent::ConnectFailed(ErrorClass::Auth),
        );
        assert_eq!(t.next, SessionState::AwaitingAuth);
        assert_eq!(t.effects, vec![Effect::Teardown]);
    }

    #[test]
    fn test_generic_error_while_listening() {
        let t = transition(
            SessionState::Listening,
            &SessionEvent::ChannelError(ErrorClass::Generic),
        );
        assert_eq!(t.next, SessionState::Error);
    }

    #[test]
    fn test_audio_moves_to_speaking() {
        let t = transition(SessionState::Listening, &SessionEvent::AudioChunk(frame()));
        assert_eq!(t.next, SessionState::Speaking);
        assert_eq!(t.effects, vec![Effect::Enqueue(frame())]);
    }

    #[test]
    fn test_interrupt_is_immediate() {
        let t = transition(SessionState::Speaking, &SessionEvent::Interrupted);
        assert_eq!(t.next, SessionState::Listening);
        assert_eq!(t.effects, vec![Effect::InterruptPlayback]);
    }

    #[test]
    fn test_drain_returns_to_listening() {
        let t = transition(SessionState::Speaking, &SessionEvent::PlaybackDrained);
        assert_eq!(t.next, SessionState::Listening);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_close_from_any_state_goes_idle() {
        for state in [
            SessionState::Connecting,
            SessionState::Listening,
            SessionState::Speaking,
            SessionState::AwaitingAuth,
            SessionState::Error,
        ] {
            let t = transition(state, &SessionEvent::ChannelClosed);
            assert_eq!(t.next, SessionState::Idle, "from {}", state);
            assert_eq!(t.effects, vec![Effect::Teardown]);
        }
    }

    #[test]
    fn test_reauth_and_retry_paths_are_distinct() {
        let t = transition(SessionState::AwaitingAuth, &SessionEvent::ReauthCompleted);
        assert_eq!(t.next, SessionState::Idle);

        let t = transition(SessionState::AwaitingAuth, &SessionEvent::RetryRequested);
        assert!(t.is_noop(SessionState::AwaitingAuth));

        let t = transition(SessionState::Error, &SessionEvent::RetryRequested);
        assert_eq!(t.next, SessionState::Connecting);

        let t = transition(SessionState::Error, &SessionEvent::ReauthCompleted);
        assert!(t.is_noop(SessionState::Error));
    }

    #[test]
    fn test_image_failure_only_matters_when_auth() {
        let t = transition(
            SessionState::Speaking,
            &SessionEvent::ImageFailed(ErrorClass::Generic),
        );
        assert!(t.is_noop(SessionState::Speaking));

        let t = transition(
            SessionState::Speaking,
            &SessionEvent::ImageFailed(ErrorClass::Auth),
        );
        assert_eq!(t.next, SessionState::AwaitingAuth);
    }

    #[test]
    fn test_stop_closes_channel_and_waits_for_close() {
        let t = transition(SessionState::Speaking, &SessionEvent::StopRequested);
        assert_eq!(t.next, SessionState::Speaking);
        assert_eq!(t.effects, vec![Effect::CloseChannel]);

        let t = transition(SessionState::Connecting, &SessionEvent::StopRequested);
        assert_eq!(t.next, SessionState::Idle);
    }

    #[test]
    fn test_audio_ignored_when_not_connected() {
        assert!(transition(SessionState::Idle, &SessionEvent::AudioChunk(frame()))
            .is_noop(SessionState::Idle));
        assert!(
            transition(SessionState::Connecting, &SessionEvent::TurnComplete)
                .is_noop(SessionState::Connecting)
        );
    }

    #[test]
    fn test_state_serializes_for_observers() {
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingAuth).unwrap(),
            "\"AUTH\""
        );
        assert_eq!(
            serde_json::to_string(&SessionState::Listening).unwrap(),
            "\"LISTENING\""
        );
    }
}
