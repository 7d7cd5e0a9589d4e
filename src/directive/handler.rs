//! Directive payloads and the handler contract the router and processor
//! dispatch to.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex as PMutex;
use tracing::{trace, warn};

use crate::{
    directive::processor::HANDLE_TABLE,
    id::{CorrelationToken, DialogRequestId, MessageId, NamespaceAndName},
};

/// Resource mediums a directive's handling will contend for in the focus
/// manager. An orthogonal bitmask alongside [`BlockingPolicy`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Mediums {
    /// This directive's handling will acquire an audio channel.
    pub audio: bool,
    /// This directive's handling will acquire a visual channel.
    pub visual: bool,
}

impl Mediums {
    /// Neither medium is used.
    pub const NONE: Self = Self {
        audio: false,
        visual: false,
    };

    /// The audio medium only.
    pub const AUDIO: Self = Self {
        audio: true,
        visual: false,
    };

    /// The visual medium only.
    pub const VISUAL: Self = Self {
        audio: false,
        visual: true,
    };

    /// Both audio and visual mediums.
    pub const BOTH: Self = Self {
        audio: true,
        visual: true,
    };
}

/// Controls whether subsequent directives in the same processor must wait
/// for this one's completion/failure before being handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum BlockingPolicy {
    /// Unregister this handler binding the moment it is assigned to a
    /// directive; used for one-shot handlers.
    None,
    /// Subsequent directives in this processor may be handled concurrently
    /// with this one.
    NonBlocking {
        /// Resources this directive's handling will contend for.
        mediums: Mediums,
    },
    /// Subsequent directives in this processor must wait for this one to
    /// complete or fail.
    Blocking {
        /// Resources this directive's handling will contend for.
        mediums: Mediums,
    },
}

impl BlockingPolicy {
    /// True if this policy is [`BlockingPolicy::Blocking`].
    pub fn is_blocking(&self) -> bool {
        matches!(self, BlockingPolicy::Blocking { .. })
    }

    /// The mediums this directive's handling will contend for, if any.
    pub fn mediums(&self) -> Mediums {
        match self {
            BlockingPolicy::None => Mediums::NONE,
            BlockingPolicy::NonBlocking { mediums } | BlockingPolicy::Blocking { mediums } => {
                *mediums
            },
        }
    }
}

impl fmt::Display for BlockingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingPolicy::None => write!(f, "NONE"),
            BlockingPolicy::NonBlocking { .. } => write!(f, "NON_BLOCKING"),
            BlockingPolicy::Blocking { .. } => write!(f, "BLOCKING"),
        }
    }
}

/// An immutable, server-issued command.
///
/// Directives are held by reference inside processor queues and freed once
/// their last queue entry is removed and any in-flight handler call
/// returns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directive {
    /// Unique identifier for this directive.
    pub message_id: MessageId,
    /// The dialog this directive belongs to. May be empty (the "no current
    /// dialog" sentinel), in which case it bypasses dialog-id matching.
    pub dialog_request_id: DialogRequestId,
    /// Correlation token forwarded from the transport layer, never
    /// interpreted by the core.
    pub correlation_token: CorrelationToken,
    /// Opaque payload bytes; no wire format is defined at this layer.
    pub payload: Vec<u8>,
    namespace_and_name: NamespaceAndName,
}

impl Directive {
    /// Builds a directive.
    pub fn new(
        message_id: impl Into<MessageId>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        dialog_request_id: impl Into<DialogRequestId>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            dialog_request_id: dialog_request_id.into(),
            correlation_token: CorrelationToken::none(),
            payload: Vec::new(),
            namespace_and_name: NamespaceAndName::new(namespace, name),
        }
    }

    /// This directive's `(namespace, name)` identity, used as the router's
    /// lookup key.
    pub fn namespace_and_name(&self) -> &NamespaceAndName {
        &self.namespace_and_name
    }

    /// Attaches a payload, consuming and returning `self`.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Receives completion or failure notification for one directive's
/// handling, bound at `preHandleDirective` time.
///
/// A concrete [`ProcessorResultSink`] closes over a [`ProcessorHandle`] and
/// looks its owning processor up in the process-wide handle table when
/// fired; if the processor is gone, the notification is silently dropped
/// (*ResultAfterTeardown*).
///
/// [`ProcessorHandle`]: crate::id::ProcessorHandle
pub trait ResultSink: Send + Sync + fmt::Debug {
    /// Reports that handling completed successfully.
    fn set_completed(&self);
    /// Reports that handling failed, with a human-readable description.
    fn set_failed(&self, description: &str);
}

/// The contract domain handlers implement to receive directives from the
/// router.
#[async_trait]
pub trait DirectiveHandler: Send + Sync {
    /// Handles a directive that does not participate in the
    /// pre-handle/handle/cancel lifecycle; fire and forget.
    async fn handle_directive_immediately(&self, directive: Arc<Directive>);

    /// Prepares a directive for handling. Called before the directive
    /// reaches the front of the processor's handling queue. `result` must
    /// eventually be fired exactly once, unless the directive is scrubbed
    /// first.
    async fn pre_handle_directive(&self, directive: Arc<Directive>, result: Arc<dyn ResultSink>);

    /// Handles a directive whose `message_id` was previously passed to
    /// [`DirectiveHandler::pre_handle_directive`]. Returns `false` if the
    /// id is not recognized.
    async fn handle_directive(&self, message_id: &MessageId) -> bool;

    /// Cancels a directive previously passed to
    /// [`DirectiveHandler::pre_handle_directive`].
    async fn cancel_directive(&self, message_id: &MessageId);

    /// Called exactly once, after this handler's last registration is
    /// removed from the router, and never while a router call into this
    /// handler is in progress.
    fn on_deregistered(&self) {}
}

/// A [`ResultSink`] bound to one directive and to the processor handle that
/// issued it. Firing after the owning processor has shut down is a no-op.
#[derive(Debug)]
pub struct ProcessorResultSink {
    handle: crate::id::ProcessorHandle,
    message_id: MessageId,
    fired: PMutex<bool>,
}

impl ProcessorResultSink {
    pub(crate) fn new(handle: crate::id::ProcessorHandle, message_id: MessageId) -> Self {
        Self {
            handle,
            message_id,
            fired: PMutex::new(false),
        }
    }

    fn mark_fired(&self) -> bool {
        let mut fired = self.fired.lock();
        if *fired {
            false
        } else {
            *fired = true;
            true
        }
    }
}

impl ResultSink for ProcessorResultSink {
    fn set_completed(&self) {
        if !self.mark_fired() {
            warn!(message_id = %self.message_id, "result sink fired more than once");
            return;
        }
        dispatch_result(&self.handle, &self.message_id, None);
    }

    fn set_failed(&self, description: &str) {
        if !self.mark_fired() {
            warn!(message_id = %self.message_id, "result sink fired more than once");
            return;
        }
        dispatch_result(&self.handle, &self.message_id, Some(description.to_owned()));
    }
}

fn dispatch_result(
    handle: &crate::id::ProcessorHandle,
    message_id: &MessageId,
    failure: Option<String>,
) {
    let processor = HANDLE_TABLE.get(handle).and_then(|entry| entry.upgrade());
    match processor {
        Some(processor) => match failure {
            None => processor.on_completed(message_id),
            Some(description) => processor.on_failed(message_id, &description),
        },
        None => trace!(%message_id, "result arrived after processor teardown"),
    }
}
