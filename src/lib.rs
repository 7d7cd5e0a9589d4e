#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! `dialog-core` is the coordination subsystem of a voice-assistant client
//! SDK: the dialog-directive scheduler, the channel focus arbiter, and the
//! dialog-state aggregator that together decide (a) in what order
//! server-issued commands are dispatched to domain handlers, (b) which
//! ongoing audio/visual activity is permitted in the foreground at any
//! moment, and (c) what the user-visible dialog state is at any moment.
//!
//! Three cooperating components, leaves first:
//!  * The [`directive`] module: a thread-safe [`directive::DirectiveRouter`]
//!    resolving a directive's `(namespace, name)` identity to a handler,
//!    composed with a per-dialog [`directive::DirectiveProcessor`] that
//!    drives directives through pre-handle/handle/cancel in order,
//!    enforcing at-most-one-blocking-in-flight and dialog-scoped bulk
//!    cancellation.
//!  * The [`focus`] module: a priority-ordered [`focus::FocusManager`]
//!    arbitrating named audio/visual channels, notifying observers of
//!    focus transitions and a secondary mixing-behavior hint.
//!  * The [`ux`] module: a [`ux::DialogUxStateAggregator`] merging
//!    recognizer, synthesizer, interaction-model, and connection-status
//!    signals into one user-visible [`ux::DialogUxState`].
//!
//! This crate does not implement network transport, concrete domain
//! handlers (audio players, speech synthesizers, recognizers), media
//! codecs, wakeword detection, authorization, persistence, configuration
//! *loading*, or capability-discovery payload construction — it sees only
//! the abstract handler/observer contracts those collaborators implement.
#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_link_with_quotes,
)]

pub mod config;
pub mod directive;
pub mod error;
pub mod focus;
pub mod id;
pub mod metrics;
pub mod ux;

pub use config::Config;
pub use error::{CoreError, CoreResult};
