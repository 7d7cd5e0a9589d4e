//! Directive routing and per-dialog scheduling.
//!
//! Composes two pieces: the [`router`], a registry resolving a directive's
//! `(namespace, name)` identity to a handler, and the [`processor`], a
//! per-dialog queueing engine that drives directives through
//! pre-handle/handle/cancel in order.

pub mod handler;
pub mod processor;
pub mod router;

pub use handler::{BlockingPolicy, Directive, DirectiveHandler, Mediums, ResultSink};
pub use processor::DirectiveProcessor;
pub use router::{DirectiveRouter, HandlerBinding, RouterError};
