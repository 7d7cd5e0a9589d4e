//! Per-dialog directive queueing engine.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex as StdMutex,
    },
    thread,
};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::{runtime::Handle as RuntimeHandle, sync::Mutex as AsyncMutex};
use tracing::{debug, instrument, trace, warn};

use crate::{
    directive::{
        handler::{Directive, ProcessorResultSink, ResultSink},
        router::DirectiveRouter,
    },
    id::{DialogRequestId, MessageId, ProcessorHandle},
};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-wide table mapping a processor's stable handle to a weak
/// reference to its shared state.
///
/// Result sinks close over a [`ProcessorHandle`] rather than a strong
/// reference; firing after the table entry has been removed (on shutdown)
/// is the *ResultAfterTeardown* case and is silently dropped.
pub(crate) static HANDLE_TABLE: Lazy<DashMap<ProcessorHandle, std::sync::Weak<ProcessorShared>>> =
    Lazy::new(DashMap::new);

struct ProcessorState {
    current_dialog_request_id: DialogRequestId,
    handling_queue: VecDeque<Arc<Directive>>,
    cancelling_queue: VecDeque<Arc<Directive>>,
    being_pre_handled: Option<Arc<Directive>>,
    is_handling_directive: bool,
    is_shutting_down: bool,
    is_enabled: bool,
}

impl ProcessorState {
    fn new() -> Self {
        Self {
            current_dialog_request_id: DialogRequestId::cleared(),
            handling_queue: VecDeque::new(),
            cancelling_queue: VecDeque::new(),
            being_pre_handled: None,
            is_handling_directive: false,
            is_shutting_down: false,
            is_enabled: true,
        }
    }

    fn wake_predicate(&self) -> bool {
        !self.cancelling_queue.is_empty()
            || (!self.handling_queue.is_empty() && !self.is_handling_directive)
            || self.is_shutting_down
    }
}

/// Shared state behind a [`DirectiveProcessor`], kept alive by the
/// processor handle and by any in-flight [`ProcessorResultSink`]s via the
/// process-wide handle table.
pub struct ProcessorShared {
    handle: ProcessorHandle,
    name: String,
    router: Arc<DirectiveRouter>,
    runtime: RuntimeHandle,
    outer: AsyncMutex<()>,
    state: StdMutex<ProcessorState>,
    condvar: Condvar,
    worker: StdMutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for ProcessorShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorShared")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .finish()
    }
}

/// Per-dialog directive queueing engine.
///
/// Owns a background worker thread and two FIFO queues (handling and
/// cancelling). Enforces per-dialog correlation, at-most-one-blocking-in-
/// flight ordering within the handling queue, and bulk cancellation when a
/// new dialog supersedes an old one or a directive fails.
pub struct DirectiveProcessor {
    shared: Arc<ProcessorShared>,
}

impl fmt::Debug for DirectiveProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.shared, f)
    }
}

impl DirectiveProcessor {
    /// Creates a processor bound to `router`, with a background worker
    /// thread spawned immediately. Must be called from within a Tokio
    /// runtime: handler calls are async, and the worker thread drives them
    /// to completion via the calling runtime's handle.
    pub fn new(name: impl Into<String>, router: Arc<DirectiveRouter>) -> Self {
        let handle = ProcessorHandle::from_raw(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(ProcessorShared {
            handle,
            name: name.into(),
            router,
            runtime: RuntimeHandle::current(),
            outer: AsyncMutex::new(()),
            state: StdMutex::new(ProcessorState::new()),
            condvar: Condvar::new(),
            worker: StdMutex::new(None),
        });

        HANDLE_TABLE.insert(handle, Arc::downgrade(&shared));

        let worker_shared = shared.clone();
        let join = thread::Builder::new()
            .name(format!("directive-processor-{}", handle))
            .spawn(move || run_worker(worker_shared))
            .expect("failed to spawn directive processor worker thread");
        *shared.worker.lock().unwrap() = Some(join);

        Self { shared }
    }

    /// This processor's diagnostic name, supplied at construction. Useful
    /// for correlating log lines when several processors share one router.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// This processor's stable handle in the process-wide table.
    pub fn handle(&self) -> ProcessorHandle {
        self.shared.handle
    }

    /// Submits a directive for scheduling.
    ///
    /// Drops the directive (returns `true`, "consumed") without further
    /// action if its `dialog_request_id` is non-empty and does not match
    /// the current dialog, or if the processor is disabled or shutting
    /// down. Otherwise pre-handles the directive through the router; if
    /// accepted, queues it for handling and returns the router's
    /// acceptance (`true`). If rejected, scrubs the directive's dialog
    /// (*LookupMiss* treated as a dialog-wide failure) and returns `false`.
    #[instrument(skip(self, directive))]
    pub async fn on_directive(&self, directive: Arc<Directive>) -> bool {
        let _outer = self.shared.outer.lock().await;

        {
            let state = self.shared.state.lock().unwrap();
            let mismatched_dialog = !directive.dialog_request_id.is_empty()
                && directive.dialog_request_id != state.current_dialog_request_id;
            if mismatched_dialog || state.is_shutting_down || !state.is_enabled {
                trace!(message_id = %directive.message_id, "dropping directive (not current dialog, disabled, or shutting down)");
                return true;
            }
        }

        {
            let mut state = self.shared.state.lock().unwrap();
            state.being_pre_handled = Some(directive.clone());
        }

        let sink: Arc<dyn ResultSink> = Arc::new(ProcessorResultSink::new(
            self.shared.handle,
            directive.message_id.clone(),
        ));
        let accepted = self
            .shared
            .router
            .pre_handle_directive(directive.clone(), sink)
            .await;

        {
            let mut state = self.shared.state.lock().unwrap();
            let still_current = state
                .being_pre_handled
                .as_ref()
                .map_or(false, |d| Arc::ptr_eq(d, &directive));

            if still_current {
                state.being_pre_handled = None;
                if accepted {
                    state.handling_queue.push_back(directive.clone());
                }
            }
        }
        self.shared.condvar.notify_all();

        if !accepted {
            warn!(message_id = %directive.message_id, "preHandleDirective rejected; scrubbing dialog");
            let mut state = self.shared.state.lock().unwrap();
            scrub_dialog_locked(&mut state, &directive.dialog_request_id);
            drop(state);
            self.shared.condvar.notify_all();
        }

        accepted
    }

    /// Sets the current dialog request id. A no-op if unchanged. Otherwise
    /// scrubs the previous dialog (if non-empty) before recording the new
    /// value.
    #[instrument(skip(self))]
    pub fn set_dialog_request_id(&self, new_value: DialogRequestId) {
        let mut state = self.shared.state.lock().unwrap();
        if state.current_dialog_request_id == new_value {
            return;
        }
        let previous = state.current_dialog_request_id.clone();
        if !previous.is_empty() {
            scrub_dialog_locked(&mut state, &previous);
        }
        debug!(from = %previous, to = %new_value, "dialog request id changed");
        state.current_dialog_request_id = new_value;
        drop(state);
        self.shared.condvar.notify_all();
    }

    /// Disables the processor: scrubs every pending/in-flight directive and
    /// refuses further [`DirectiveProcessor::on_directive`] calls until
    /// [`DirectiveProcessor::enable`] is called.
    pub fn disable(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.is_enabled = false;
        queue_all_for_cancellation_locked(&mut state);
        drop(state);
        self.shared.condvar.notify_all();
    }

    /// Re-enables a disabled processor.
    pub fn enable(&self) {
        self.shared.state.lock().unwrap().is_enabled = true;
    }

    /// Scrubs every pending/in-flight directive, signals the worker thread
    /// to exit, removes this processor's handle table entry, and joins the
    /// worker. Idempotent: calling this more than once is a no-op after the
    /// first call.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.is_shutting_down {
                return;
            }
            state.is_shutting_down = true;
            state.is_enabled = false;
            queue_all_for_cancellation_locked(&mut state);
        }
        self.shared.condvar.notify_all();

        HANDLE_TABLE.remove(&self.shared.handle);

        if let Some(join) = self.shared.worker.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

impl ProcessorShared {
    pub(crate) fn on_completed(&self, message_id: &MessageId) {
        let mut state = self.state.lock().unwrap();
        let removed = remove_directive_locked(&mut state, message_id);
        drop(state);
        if removed.is_some() {
            self.condvar.notify_all();
        }
    }

    pub(crate) fn on_failed(&self, message_id: &MessageId, description: &str) {
        warn!(%message_id, %description, "directive handling failed");
        let mut state = self.state.lock().unwrap();
        if let Some(directive) = remove_directive_locked(&mut state, message_id) {
            scrub_dialog_locked(&mut state, &directive.dialog_request_id);
        }
        drop(state);
        self.condvar.notify_all();
    }
}

fn remove_directive_locked(
    state: &mut ProcessorState,
    message_id: &MessageId,
) -> Option<Arc<Directive>> {
    if let Some(d) = &state.being_pre_handled {
        if &d.message_id == message_id {
            return state.being_pre_handled.take();
        }
    }

    if let Some(pos) = state.cancelling_queue.iter().position(|d| &d.message_id == message_id) {
        return state.cancelling_queue.remove(pos);
    }

    if let Some(front) = state.handling_queue.front() {
        if &front.message_id == message_id {
            state.is_handling_directive = false;
            return state.handling_queue.pop_front();
        }
    }

    if let Some(pos) = state.handling_queue.iter().position(|d| &d.message_id == message_id) {
        return state.handling_queue.remove(pos);
    }

    None
}

/// Moves everything tagged with `dialog` out of `being_pre_handled` and
/// `handling_queue` and into `cancelling_queue`. A no-op for the empty
/// ("cleared") sentinel, which is never treated as a cancelable dialog
/// grouping.
fn scrub_dialog_locked(state: &mut ProcessorState, dialog: &DialogRequestId) {
    if dialog.is_empty() {
        return;
    }

    if let Some(pre) = &state.being_pre_handled {
        if &pre.dialog_request_id == dialog {
            let directive = state.being_pre_handled.take().unwrap();
            state.cancelling_queue.push_back(directive);
        }
    }

    if state
        .handling_queue
        .front()
        .map_or(false, |d| &d.dialog_request_id == dialog)
    {
        state.is_handling_directive = false;
    }

    let drained: VecDeque<Arc<Directive>> = state.handling_queue.drain(..).collect();
    let (matching, remaining): (VecDeque<_>, VecDeque<_>) =
        drained.into_iter().partition(|d| &d.dialog_request_id == dialog);
    state.handling_queue = remaining;
    state.cancelling_queue.extend(matching);
}

fn queue_all_for_cancellation_locked(state: &mut ProcessorState) {
    if let Some(directive) = state.being_pre_handled.take() {
        state.cancelling_queue.push_back(directive);
    }
    state.is_handling_directive = false;
    while let Some(directive) = state.handling_queue.pop_front() {
        state.cancelling_queue.push_back(directive);
    }
}

fn run_worker(shared: Arc<ProcessorShared>) {
    loop {
        let mut state = shared.state.lock().unwrap();
        while !state.wake_predicate() {
            state = shared.condvar.wait(state).unwrap();
        }

        if !state.cancelling_queue.is_empty() {
            let batch: Vec<Arc<Directive>> = state.cancelling_queue.drain(..).collect();
            drop(state);
            for directive in &batch {
                shared.runtime.block_on(shared.router.cancel_directive(directive));
            }
            continue;
        }

        if state.handling_queue.front().is_some() && !state.is_handling_directive {
            let head = state.handling_queue.front().cloned().unwrap();
            state.is_handling_directive = true;
            drop(state);

            let policy = shared.runtime.block_on(shared.router.handle_directive(&head));
            let accepted = policy.is_some();
            let blocking = policy.map_or(false, |p| p.is_blocking());

            let mut state = shared.state.lock().unwrap();
            if !blocking {
                state.is_handling_directive = false;
                let still_head = state
                    .handling_queue
                    .front()
                    .map_or(false, |d| Arc::ptr_eq(d, &head));
                if still_head {
                    state.handling_queue.pop_front();
                } else {
                    warn!(
                        message_id = %head.message_id,
                        "handling queue head changed during handleDirective; not popping"
                    );
                }
                if !accepted {
                    scrub_dialog_locked(&mut state, &head.dialog_request_id);
                }
            }
            drop(state);
            shared.condvar.notify_all();
            continue;
        }

        if state.is_shutting_down {
            break;
        }
    }

    trace!("directive processor worker exiting");
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex as StdSyncMutex,
        time::{Duration, Instant},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::directive::{
        handler::Mediums,
        router::{DirectiveRouter, HandlerBinding},
    };
    use crate::directive::handler::BlockingPolicy;
    use crate::id::NamespaceAndName;

    #[derive(Default)]
    struct RecordingHandler {
        events: StdSyncMutex<Vec<String>>,
        sinks: StdSyncMutex<HashMap<String, Arc<dyn ResultSink>>>,
        accept_handle: std::sync::atomic::AtomicBool,
    }

    impl RecordingHandler {
        fn new(accept_handle: bool) -> Arc<Self> {
            Arc::new(Self {
                accept_handle: std::sync::atomic::AtomicBool::new(accept_handle),
                ..Default::default()
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn sink_for(&self, message_id: &str) -> Option<Arc<dyn ResultSink>> {
            self.sinks.lock().unwrap().get(message_id).cloned()
        }
    }

    #[async_trait]
    impl DirectiveHandler for RecordingHandler {
        async fn handle_directive_immediately(&self, directive: Arc<Directive>) {
            self.events.lock().unwrap().push(format!("immediate:{}", directive.message_id));
        }

        async fn pre_handle_directive(&self, directive: Arc<Directive>, result: Arc<dyn ResultSink>) {
            self.events.lock().unwrap().push(format!("pre:{}", directive.message_id));
            self.sinks
                .lock()
                .unwrap()
                .insert(directive.message_id.as_str().to_owned(), result);
        }

        async fn handle_directive(&self, message_id: &MessageId) -> bool {
            self.events.lock().unwrap().push(format!("handle:{}", message_id));
            self.accept_handle.load(Ordering::SeqCst)
        }

        async fn cancel_directive(&self, message_id: &MessageId) {
            self.events.lock().unwrap().push(format!("cancel:{}", message_id));
        }
    }

    fn wait_for(mut predicate: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            if Instant::now() > deadline {
                panic!("condition not reached in time");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn s1_single_non_blocking_directive() {
        let router = Arc::new(DirectiveRouter::new());
        let handler = RecordingHandler::new(true);
        router
            .add_directive_handlers(vec![HandlerBinding::new(
                NamespaceAndName::new("ns0", "n0"),
                handler.clone(),
                BlockingPolicy::NonBlocking { mediums: Mediums::NONE },
            )])
            .unwrap();

        let processor = DirectiveProcessor::new("s1", router);
        processor.set_dialog_request_id(DialogRequestId::new("D0"));

        let directive = Arc::new(Directive::new("M00", "ns0", "n0", "D0"));
        assert!(processor.on_directive(directive).await);

        wait_for(|| handler.events().len() >= 2);
        assert_eq!(handler.events(), vec!["pre:M00", "handle:M00"]);

        processor.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn s2_blocking_directive_gates_the_next() {
        let router = Arc::new(DirectiveRouter::new());
        let blocking_handler = RecordingHandler::new(true);
        let nb_handler = RecordingHandler::new(true);

        router
            .add_directive_handlers(vec![
                HandlerBinding::new(
                    NamespaceAndName::new("ns0", "n0"),
                    blocking_handler.clone(),
                    BlockingPolicy::Blocking { mediums: Mediums::NONE },
                ),
                HandlerBinding::new(
                    NamespaceAndName::new("ns0", "n1"),
                    nb_handler.clone(),
                    BlockingPolicy::NonBlocking { mediums: Mediums::NONE },
                ),
            ])
            .unwrap();

        let processor = DirectiveProcessor::new("s2", router);
        processor.set_dialog_request_id(DialogRequestId::new("D0"));

        let m00 = Arc::new(Directive::new("M00", "ns0", "n0", "D0"));
        let m01 = Arc::new(Directive::new("M01", "ns0", "n1", "D0"));
        assert!(processor.on_directive(m00).await);
        assert!(processor.on_directive(m01).await);

        wait_for(|| blocking_handler.events().contains(&"handle:M00".to_owned()));
        // M01 has pre-handled but must not yet be handled: M00 is blocking.
        wait_for(|| nb_handler.events().iter().any(|e| e.starts_with("pre:")));
        assert!(!nb_handler.events().iter().any(|e| e.starts_with("handle:")));

        let sink = blocking_handler.sink_for("M00").expect("sink registered");
        sink.set_completed();

        wait_for(|| nb_handler.events().iter().any(|e| e.starts_with("handle:")));
        assert_eq!(nb_handler.events(), vec!["pre:M01", "handle:M01"]);

        processor.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn s3_dialog_switch_cancels_pending_directives() {
        let router = Arc::new(DirectiveRouter::new());
        let blocking_handler = RecordingHandler::new(true);
        let nb_handler = RecordingHandler::new(true);
        let h2 = RecordingHandler::new(true);

        router
            .add_directive_handlers(vec![
                HandlerBinding::new(
                    NamespaceAndName::new("ns0", "n0"),
                    blocking_handler.clone(),
                    BlockingPolicy::Blocking { mediums: Mediums::NONE },
                ),
                HandlerBinding::new(
                    NamespaceAndName::new("ns0", "n1"),
                    nb_handler.clone(),
                    BlockingPolicy::NonBlocking { mediums: Mediums::NONE },
                ),
                HandlerBinding::new(
                    NamespaceAndName::new("ns1", "n0"),
                    h2.clone(),
                    BlockingPolicy::NonBlocking { mediums: Mediums::NONE },
                ),
            ])
            .unwrap();

        let processor = DirectiveProcessor::new("s3", router);
        processor.set_dialog_request_id(DialogRequestId::new("D0"));

        let m00 = Arc::new(Directive::new("M00", "ns0", "n0", "D0"));
        let m01 = Arc::new(Directive::new("M01", "ns0", "n1", "D0"));
        assert!(processor.on_directive(m00).await);
        assert!(processor.on_directive(m01).await);

        wait_for(|| nb_handler.events().iter().any(|e| e.starts_with("pre:")));

        processor.set_dialog_request_id(DialogRequestId::new("D1"));

        wait_for(|| {
            blocking_handler.events().contains(&"cancel:M00".to_owned())
                && nb_handler.events().contains(&"cancel:M01".to_owned())
        });

        let m10 = Arc::new(Directive::new("M10", "ns1", "n0", "D1"));
        assert!(processor.on_directive(m10).await);
        wait_for(|| h2.events().iter().any(|e| e.starts_with("handle:")));
        assert_eq!(h2.events(), vec!["pre:M10", "handle:M10"]);

        processor.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_blocking_handler_rejection_scrubs_dialog() {
        let router = Arc::new(DirectiveRouter::new());
        let rejecting = RecordingHandler::new(false);

        router
            .add_directive_handlers(vec![HandlerBinding::new(
                NamespaceAndName::new("ns0", "n0"),
                rejecting.clone(),
                BlockingPolicy::NonBlocking { mediums: Mediums::NONE },
            )])
            .unwrap();

        let processor = DirectiveProcessor::new("p4", router);
        processor.set_dialog_request_id(DialogRequestId::new("D0"));

        let directive = Arc::new(Directive::new("M00", "ns0", "n0", "D0"));
        assert!(processor.on_directive(directive).await);

        wait_for(|| rejecting.events().iter().any(|e| e.starts_with("handle:")));
        // The handling queue must end up empty: a rejected, non-blocking
        // handle still pops its head rather than looping forever.
        wait_for(|| {
            let state = processor.shared.state.lock().unwrap();
            state.handling_queue.is_empty() && !state.is_handling_directive
        });

        processor.shutdown();
    }

    #[test]
    fn empty_dialog_request_id_bypasses_match_and_scrub() {
        let mut state = ProcessorState::new();
        state.current_dialog_request_id = DialogRequestId::new("D0");

        let directive = Arc::new(Directive::new("M00", "ns0", "n0", ""));
        state.being_pre_handled = Some(directive.clone());

        // Scrubbing the empty sentinel must never move anything: it is not
        // a cancelable dialog grouping.
        scrub_dialog_locked(&mut state, &DialogRequestId::cleared());
        assert!(state.being_pre_handled.is_some());
        assert!(state.cancelling_queue.is_empty());
    }
}
