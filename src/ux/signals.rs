//! Inputs and outputs of the dialog UX state aggregator.

use std::fmt;

/// Recognizer state transitions consumed by the aggregator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecognizerState {
    /// Not currently listening.
    Idle,
    /// Actively capturing and recognizing speech.
    Recognizing,
    /// Waiting for the user to start speaking in response to a prompt.
    ExpectingSpeech,
    /// Processing a just-captured utterance; not accepting new audio.
    Busy,
}

impl fmt::Display for RecognizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerState::Idle => write!(f, "IDLE"),
            RecognizerState::Recognizing => write!(f, "RECOGNIZING"),
            RecognizerState::ExpectingSpeech => write!(f, "EXPECTING_SPEECH"),
            RecognizerState::Busy => write!(f, "BUSY"),
        }
    }
}

/// Speech synthesizer state transitions consumed by the aggregator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SynthesizerState {
    /// Actively rendering speech audio.
    Playing,
    /// Finished rendering speech normally.
    Finished,
    /// Speech was interrupted before completion.
    Interrupted,
    /// About to start playing; has requested but not yet received audio
    /// focus. Suppresses the short-thinking fallback so a RPC-driven idle
    /// transition does not race a synthesizer that is about to speak.
    GainingFocus,
    /// Lost audio focus mid-utterance.
    LosingFocus,
}

impl fmt::Display for SynthesizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesizerState::Playing => write!(f, "PLAYING"),
            SynthesizerState::Finished => write!(f, "FINISHED"),
            SynthesizerState::Interrupted => write!(f, "INTERRUPTED"),
            SynthesizerState::GainingFocus => write!(f, "GAINING_FOCUS"),
            SynthesizerState::LosingFocus => write!(f, "LOSING_FOCUS"),
        }
    }
}

/// A single networked engine's connection status, as aggregated by the
/// dialog UX aggregator across every engine it is told about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    /// This engine is connected.
    Connected,
    /// This engine is disconnected.
    Disconnected,
}

/// The single, user-visible dialog state derived from every underlying
/// signal the aggregator receives. Exactly one value holds at any time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DialogUxState {
    /// Nothing is happening; not listening, thinking, or speaking.
    Idle,
    /// Actively capturing the user's speech.
    Listening,
    /// Waiting for the user to start speaking in response to a prompt.
    Expecting,
    /// Waiting on a server response to a completed utterance.
    Thinking,
    /// Rendering a spoken response.
    Speaking,
    /// Present in the source enum but unreached by this aggregator's
    /// transition table; no implemented rule ever assigns it. Kept for
    /// data-model fidelity with the upstream `DialogUXState` enum.
    Finished,
}

impl fmt::Display for DialogUxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogUxState::Idle => write!(f, "IDLE"),
            DialogUxState::Listening => write!(f, "LISTENING"),
            DialogUxState::Expecting => write!(f, "EXPECTING"),
            DialogUxState::Thinking => write!(f, "THINKING"),
            DialogUxState::Speaking => write!(f, "SPEAKING"),
            DialogUxState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Notified synchronously whenever the aggregator's [`DialogUxState`]
/// changes. Implementations must return promptly: notification happens on
/// the aggregator's single-consumer task, and a slow observer blocks every
/// other pending signal.
///
/// An observer added via `add_observer` is immediately given the current
/// state. `remove_observer` must never be called from inside a callback of
/// this trait: it blocks waiting for the aggregator's task to process the
/// removal, which cannot happen while that same task is running the
/// callback, and the call deadlocks.
pub trait DialogUXStateObserver: Send + Sync {
    /// Called with the aggregator's new state, and once immediately upon
    /// registration with the current state.
    fn on_dialog_ux_state_changed(&self, new_state: DialogUxState);
}
