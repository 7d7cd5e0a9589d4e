//! Cancellable timers for the dialog UX aggregator.
//!
//! Each timer is a spawned `tokio::time::sleep` gated by a generation
//! counter: scheduling a new timer (or explicitly cancelling) bumps the
//! counter, so a sleep that wakes after being superseded finds its
//! generation stale and sends nothing. This avoids needing a real
//! cancellation handle per timer, mirroring the `RetryConnect(retry_idx)`
//! generation-check pattern used elsewhere in this codebase's task loops.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use std::time::Duration;

/// Identifies which of the aggregator's three named timeouts a
/// [`UxMessage::TimerFired`](crate::ux::aggregator::UxMessage::TimerFired)
/// message refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TimerKind {
    /// Upper bound on time spent in `THINKING` with no further speech
    /// start.
    LongThinking,
    /// Restart window used after a RPC-while-`THINKING` edge case, or an
    /// inbound message notification, to distinguish "speech about to
    /// start" from "nothing further is coming".
    ShortThinkingReplace,
    /// Restart window after speech finishes/is interrupted, confirming
    /// idle only if the recognizer has also gone quiet by the time it
    /// fires.
    TryEnterIdle,
    /// Bound on time spent in `LISTENING` waiting for
    /// `onRequestProcessingStarted`.
    ListeningToIdle,
}

/// A single outstanding-timer slot shared between the aggregator's task
/// and every sleep it has ever spawned.
pub(crate) struct Timers {
    generation: Arc<AtomicU64>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self { generation: Arc::new(AtomicU64::new(0)) }
    }

    /// Invalidates whatever timer is currently outstanding, without
    /// scheduling a replacement.
    pub(crate) fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The generation a just-fired [`TimerKind`] message must match to be
    /// considered live rather than stale.
    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidates any outstanding timer and spawns a new one: after
    /// `duration`, `on_fire` is sent `kind` paired with the generation
    /// assigned here, unless a later `cancel`/`schedule` call has already
    /// moved the generation on.
    pub(crate) fn schedule(
        &self,
        kind: TimerKind,
        duration: Duration,
        sender: flume::Sender<super::aggregator::UxMessage>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if counter.load(Ordering::SeqCst) == generation {
                let _ = sender.send(super::aggregator::UxMessage::TimerFired(kind, generation));
            }
        });
    }
}
