//! Dialog UX state aggregation.
//!
//! Composes the [`aggregator`] (the cross-component state merger itself),
//! the [`signals`] it consumes and produces, and the internal [`timer`]
//! primitive it uses for its three named timeouts.

pub mod aggregator;
pub mod signals;
pub(crate) mod timer;

pub use aggregator::DialogUxStateAggregator;
pub use signals::{ConnectionStatus, DialogUXStateObserver, DialogUxState, RecognizerState, SynthesizerState};
