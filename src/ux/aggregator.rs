//! Cross-component dialog UX state merger.
//!
//! Listens to the recognizer, the speech synthesizer, the interaction-model
//! request lifecycle, inbound message notifications, and aggregated
//! connection status, and derives a single user-facing [`DialogUxState`].
//! All state lives on one cooperative `tokio::task`, driven by a
//! `flume::unbounded` channel of [`UxMessage`]; every message runs to
//! completion before the next is read, so no lock is needed on the state
//! variable beyond that guarantee.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, instrument, warn};

use crate::{
    config::Config,
    metrics::{MetricEvent, MetricsRecorder, NoopMetricsRecorder},
    ux::{
        signals::{ConnectionStatus, DialogUXStateObserver, DialogUxState, RecognizerState, SynthesizerState},
        timer::{TimerKind, Timers},
    },
};

/// Messages processed, one at a time and to completion, by the
/// aggregator's task.
pub(crate) enum UxMessage {
    RecognizerStateChanged(RecognizerState),
    SynthesizerStateChanged(SynthesizerState),
    RequestProcessingStarted,
    RequestProcessingCompleted,
    MessageReceived,
    ConnectionStatusChanged(String, ConnectionStatus),
    TimerFired(TimerKind, u64),
    AddObserver(Arc<dyn DialogUXStateObserver>, std::sync::mpsc::Sender<()>),
    RemoveObserver(usize, std::sync::mpsc::Sender<()>),
    Shutdown,
}

struct State {
    ux: DialogUxState,
    recognizer: RecognizerState,
    synthesizer: Option<SynthesizerState>,
    connections: HashMap<String, ConnectionStatus>,
    observers: Vec<Arc<dyn DialogUXStateObserver>>,
    timers: Timers,
    sender: flume::Sender<UxMessage>,
    config: Config,
    metrics: Arc<dyn MetricsRecorder>,
}

impl State {
    fn set_state(&mut self, new_state: DialogUxState) {
        self.timers.cancel();
        self.ux = new_state;
        debug!(state = %new_state, "dialog ux state changed");
        let observers = self.observers.clone();
        for observer in observers {
            observer.on_dialog_ux_state_changed(new_state);
        }
    }

    fn start_long_thinking_timer(&self) {
        self.timers.schedule(TimerKind::LongThinking, self.config.thinking_to_idle, self.sender.clone());
    }

    fn start_short_thinking_timer(&self, kind: TimerKind) {
        self.timers.schedule(kind, self.config.short_thinking_to_idle, self.sender.clone());
    }

    fn start_listening_to_idle_timer(&self) {
        self.timers.schedule(TimerKind::ListeningToIdle, self.config.listening_to_idle, self.sender.clone());
    }

    fn on_recognizer_state_changed(&mut self, state: RecognizerState) {
        self.recognizer = state;
        match state {
            RecognizerState::Recognizing => self.set_state(DialogUxState::Listening),
            RecognizerState::ExpectingSpeech => self.set_state(DialogUxState::Expecting),
            RecognizerState::Busy => {
                if self.ux == DialogUxState::Listening {
                    self.start_listening_to_idle_timer();
                }
            },
            RecognizerState::Idle => {},
        }
    }

    fn on_synthesizer_state_changed(&mut self, state: SynthesizerState) {
        self.synthesizer = Some(state);
        match state {
            SynthesizerState::Playing => self.set_state(DialogUxState::Speaking),
            SynthesizerState::Finished | SynthesizerState::Interrupted => {
                self.timers.schedule(TimerKind::TryEnterIdle, self.config.short_thinking_to_idle, self.sender.clone());
            },
            SynthesizerState::GainingFocus => {
                // Doesn't move `self.ux`, but unconditionally stops any
                // outstanding listening-to-idle/long-thinking timer: the
                // synthesizer is about to barge in and speak, and neither
                // timer may be allowed to fire and force IDLE underneath it.
                self.timers.cancel();
            },
            SynthesizerState::LosingFocus => {},
        }
    }

    fn on_request_processing_started(&mut self) {
        match self.ux {
            DialogUxState::Listening => {
                self.set_state(DialogUxState::Thinking);
                self.start_long_thinking_timer();
            },
            DialogUxState::Idle => {
                warn!("onRequestProcessingStarted received while IDLE; tolerated as an edge case");
                self.set_state(DialogUxState::Thinking);
                self.start_long_thinking_timer();
            },
            _ => {
                debug!(state = %self.ux, "onRequestProcessingStarted ignored in current state");
            },
        }
    }

    fn on_request_processing_completed(&mut self) {
        match self.ux {
            DialogUxState::Listening => self.set_state(DialogUxState::Idle),
            DialogUxState::Thinking => {
                if self.synthesizer != Some(SynthesizerState::GainingFocus) {
                    self.start_short_thinking_timer(TimerKind::ShortThinkingReplace);
                }
            },
            _ => {},
        }
    }

    fn on_message_received(&mut self) {
        if self.ux == DialogUxState::Thinking && self.synthesizer != Some(SynthesizerState::GainingFocus) {
            self.start_short_thinking_timer(TimerKind::ShortThinkingReplace);
        }
    }

    fn on_connection_status_changed(&mut self, engine: String, status: ConnectionStatus) {
        self.connections.insert(engine, status);
        let all_disconnected =
            !self.connections.is_empty() && self.connections.values().all(|s| *s == ConnectionStatus::Disconnected);
        if all_disconnected {
            self.set_state(DialogUxState::Idle);
        }
    }

    fn on_timer_fired(&mut self, kind: TimerKind, generation: u64) {
        if generation != self.timers.current_generation() {
            return;
        }

        match kind {
            TimerKind::LongThinking => {
                self.metrics.record(MetricEvent { name: "THINKING_TIMEOUT_EXPIRES" });
                self.set_state(DialogUxState::Idle);
            },
            TimerKind::ShortThinkingReplace => {
                self.metrics.record(MetricEvent { name: "THINKING_TIMEOUT_EXPIRES" });
                self.set_state(DialogUxState::Idle);
            },
            TimerKind::ListeningToIdle => {
                if self.ux == DialogUxState::Listening {
                    self.metrics.record(MetricEvent { name: "LISTENING_TIMEOUT_EXPIRES" });
                    self.set_state(DialogUxState::Idle);
                }
            },
            TimerKind::TryEnterIdle => {
                let synthesizer_done = matches!(
                    self.synthesizer,
                    Some(SynthesizerState::Finished) | Some(SynthesizerState::Interrupted)
                );
                if self.recognizer == RecognizerState::Idle && synthesizer_done {
                    self.set_state(DialogUxState::Idle);
                }
            },
        }
    }
}

fn observer_key(observer: &Arc<dyn DialogUXStateObserver>) -> usize {
    Arc::as_ptr(observer) as *const () as usize
}

async fn run(mut state: State, receiver: flume::Receiver<UxMessage>) {
    while let Ok(message) = receiver.recv_async().await {
        match message {
            UxMessage::RecognizerStateChanged(s) => state.on_recognizer_state_changed(s),
            UxMessage::SynthesizerStateChanged(s) => state.on_synthesizer_state_changed(s),
            UxMessage::RequestProcessingStarted => state.on_request_processing_started(),
            UxMessage::RequestProcessingCompleted => state.on_request_processing_completed(),
            UxMessage::MessageReceived => state.on_message_received(),
            UxMessage::ConnectionStatusChanged(engine, status) => state.on_connection_status_changed(engine, status),
            UxMessage::TimerFired(kind, generation) => state.on_timer_fired(kind, generation),
            UxMessage::AddObserver(observer, ack) => {
                observer.on_dialog_ux_state_changed(state.ux);
                state.observers.push(observer);
                let _ = ack.send(());
            },
            UxMessage::RemoveObserver(key, ack) => {
                state.observers.retain(|o| observer_key(o) != key);
                let _ = ack.send(());
            },
            UxMessage::Shutdown => break,
        }
    }
}

/// Cross-component dialog UX state merger. Owns one `tokio::task` running
/// the transition table; every public method sends a message to that task
/// rather than touching shared state directly.
pub struct DialogUxStateAggregator {
    sender: flume::Sender<UxMessage>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl fmt::Debug for DialogUxStateAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogUxStateAggregator").finish()
    }
}

impl DialogUxStateAggregator {
    /// Spawns the aggregator's task, starting in `IDLE` with no engines
    /// reporting connection status. Must be called from within a Tokio
    /// runtime.
    pub fn new(config: Config) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetricsRecorder))
    }

    /// As [`DialogUxStateAggregator::new`], recording best-effort metrics
    /// to `metrics` on every timer-driven transition.
    pub fn with_metrics(config: Config, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let (tx, rx) = flume::unbounded();
        let state = State {
            ux: DialogUxState::Idle,
            recognizer: RecognizerState::Idle,
            synthesizer: None,
            connections: HashMap::new(),
            observers: Vec::new(),
            timers: Timers::new(),
            sender: tx.clone(),
            config,
            metrics,
        };
        let task = tokio::spawn(run(state, rx));
        Self { sender: tx, task: Some(task) }
    }

    /// Reports a recognizer state transition.
    #[instrument(skip(self))]
    pub fn on_recognizer_state_changed(&self, state: RecognizerState) {
        let _ = self.sender.send(UxMessage::RecognizerStateChanged(state));
    }

    /// Reports a synthesizer state transition.
    #[instrument(skip(self))]
    pub fn on_synthesizer_state_changed(&self, state: SynthesizerState) {
        let _ = self.sender.send(UxMessage::SynthesizerStateChanged(state));
    }

    /// Reports that the interaction model started processing a request.
    pub fn on_request_processing_started(&self) {
        let _ = self.sender.send(UxMessage::RequestProcessingStarted);
    }

    /// Reports that the interaction model finished processing a request.
    pub fn on_request_processing_completed(&self) {
        let _ = self.sender.send(UxMessage::RequestProcessingCompleted);
    }

    /// Reports an inbound message notification, used only to influence the
    /// short-thinking timer's restart logic.
    pub fn on_message_received(&self) {
        let _ = self.sender.send(UxMessage::MessageReceived);
    }

    /// Reports `engine`'s connection status. If every engine reported so
    /// far is disconnected, the aggregator forces `IDLE`.
    #[instrument(skip(self))]
    pub fn on_connection_status_changed(&self, engine: impl Into<String>, status: ConnectionStatus) {
        let _ = self.sender.send(UxMessage::ConnectionStatusChanged(engine.into(), status));
    }

    /// Registers an observer, which immediately and synchronously receives
    /// the current state before this call returns.
    pub fn add_observer(&self, observer: Arc<dyn DialogUXStateObserver>) {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        if self.sender.send(UxMessage::AddObserver(observer, ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Deregisters a previously added observer. Blocks until the
    /// aggregator's task has processed the removal.
    ///
    /// Must never be called from inside a [`DialogUXStateObserver`]
    /// callback: the aggregator's task cannot process this removal while
    /// it is busy running that same callback, so doing so deadlocks.
    pub fn remove_observer(&self, observer: &Arc<dyn DialogUXStateObserver>) {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        if self.sender.send(UxMessage::RemoveObserver(observer_key(observer), ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Signals the aggregator's task to exit and waits for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.sender.send(UxMessage::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DialogUxStateAggregator {
    fn drop(&mut self) {
        let _ = self.sender.send(UxMessage::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        states: StdMutex<Vec<DialogUxState>>,
    }

    impl RecordingObserver {
        fn states(&self) -> Vec<DialogUxState> {
            self.states.lock().unwrap().clone()
        }
    }

    impl DialogUXStateObserver for RecordingObserver {
        fn on_dialog_ux_state_changed(&self, new_state: DialogUxState) {
            self.states.lock().unwrap().push(new_state);
        }
    }

    fn wait_for(mut predicate: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !predicate() {
            if std::time::Instant::now() > deadline {
                panic!("condition not reached in time");
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn s6_long_thinking_timeout_forces_idle() {
        let aggregator = DialogUxStateAggregator::new(Config::test_cfg());
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());

        aggregator.on_recognizer_state_changed(RecognizerState::Recognizing);
        wait_for(|| observer.states().contains(&DialogUxState::Listening));

        aggregator.on_recognizer_state_changed(RecognizerState::Busy);
        aggregator.on_request_processing_started();
        wait_for(|| observer.states().last() == Some(&DialogUxState::Thinking));

        wait_for(|| observer.states().last() == Some(&DialogUxState::Idle));

        aggregator.shutdown().await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn rpc_while_listening_goes_idle() {
        let aggregator = DialogUxStateAggregator::new(Config::test_cfg());
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());

        aggregator.on_recognizer_state_changed(RecognizerState::Recognizing);
        wait_for(|| observer.states().contains(&DialogUxState::Listening));

        aggregator.on_request_processing_completed();
        wait_for(|| observer.states().last() == Some(&DialogUxState::Idle));

        aggregator.shutdown().await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn gaining_focus_cancels_pending_listening_to_idle_timer() {
        let aggregator = DialogUxStateAggregator::new(Config::test_cfg());
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());

        aggregator.on_recognizer_state_changed(RecognizerState::Recognizing);
        wait_for(|| observer.states().contains(&DialogUxState::Listening));

        // BUSY starts the listening-to-idle timer (50ms in test_cfg).
        aggregator.on_recognizer_state_changed(RecognizerState::Busy);
        // The synthesizer is about to barge in and speak; this must cancel
        // the pending listening-to-idle timer even though it doesn't move
        // the visible state itself.
        aggregator.on_synthesizer_state_changed(SynthesizerState::GainingFocus);

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(observer.states().last(), Some(&DialogUxState::Listening));

        aggregator.shutdown().await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn all_engines_disconnected_forces_idle() {
        let aggregator = DialogUxStateAggregator::new(Config::test_cfg());
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());

        aggregator.on_recognizer_state_changed(RecognizerState::Recognizing);
        wait_for(|| observer.states().contains(&DialogUxState::Listening));

        aggregator.on_connection_status_changed("alexa", ConnectionStatus::Disconnected);
        wait_for(|| observer.states().last() == Some(&DialogUxState::Idle));

        aggregator.shutdown().await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn remove_observer_stops_future_notifications() {
        let aggregator = DialogUxStateAggregator::new(Config::test_cfg());
        let observer = Arc::new(RecordingObserver::default());
        aggregator.add_observer(observer.clone());
        aggregator.remove_observer(&(observer.clone() as Arc<dyn DialogUXStateObserver>));

        aggregator.on_recognizer_state_changed(RecognizerState::Recognizing);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Only the immediate delivery on add_observer should be recorded.
        assert_eq!(observer.states(), vec![DialogUxState::Idle]);

        aggregator.shutdown().await;
    }
}
