//! Channel focus arbitration.
//!
//! Composes the [`manager`] (the priority-ordered arbiter itself), the
//! [`model`] types it arbitrates over, the [`observer`] contracts it
//! notifies, the [`interrupt`] model it consults for mixing decisions, and
//! the [`executor`] that serializes every mutation.

pub mod executor;
pub mod interrupt;
pub mod manager;
pub mod model;
pub mod observer;

pub use interrupt::InterruptModel;
pub use manager::{FocusError, FocusManager};
pub use model::{Activity, Channel, ChannelStateUpdate, ContentType, FocusState, MixingBehavior};
pub use observer::{ActivityTracker, ChannelObserver, FocusManagerObserver};
