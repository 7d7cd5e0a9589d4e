//! Identifier newtypes used throughout the crate.

use std::fmt;

/// Unique identifier of a single directive, assigned by the transport layer.
///
/// Two directives delivered to the same processor must never share a
/// `MessageId`; the processor and router both use it purely as an opaque
/// correlation key and never parse it.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a raw message id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Correlation token tying a group of directives to one user interaction.
///
/// The empty value is a meaningful sentinel ("no current dialog"/"clear"):
/// directives tagged with it are accepted regardless of whatever dialog id
/// is currently active, and it never triggers a scrub when set.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct DialogRequestId(String);

impl DialogRequestId {
    /// Wraps a raw dialog request id. An empty string is the "cleared" sentinel.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The cleared/empty sentinel value.
    pub fn cleared() -> Self {
        Self(String::new())
    }

    /// True if this is the empty "clear"/"no current dialog" sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DialogRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for DialogRequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DialogRequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Opaque correlation token forwarded from the transport layer, carried but
/// never interpreted by the core.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct CorrelationToken(Option<String>);

impl CorrelationToken {
    /// No correlation token present.
    pub fn none() -> Self {
        Self(None)
    }
}

impl From<Option<String>> for CorrelationToken {
    fn from(token: Option<String>) -> Self {
        Self(token)
    }
}

/// Key identifying a directive's handler registration: a `(namespace, name)` pair.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NamespaceAndName {
    /// The directive's namespace, e.g. `"SpeechRecognizer"`.
    pub namespace: String,
    /// The directive's name within its namespace, e.g. `"Recognize"`.
    pub name: String,
}

impl NamespaceAndName {
    /// Builds a key from a namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespaceAndName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Stable integer handle identifying one `DirectiveProcessor` instance in
/// the process-wide handle table.
///
/// Result sinks close over a `ProcessorHandle` rather than a direct
/// reference, so a handler call that outlives its processor resolves to a
/// dropped notification instead of a dangling pointer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProcessorHandle(u64);

impl ProcessorHandle {
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessorHandle({})", self.0)
    }
}
