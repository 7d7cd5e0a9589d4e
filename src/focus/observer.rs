//! Observer contracts consumed by the focus manager.

use crate::focus::model::{ChannelStateUpdate, FocusState, MixingBehavior};

/// Notified of focus transitions for one activity's channel, including the
/// secondary mixing-behavior hint.
///
/// Implementations must return promptly: notification happens on the focus
/// manager's executor thread, and a slow observer blocks every other
/// pending focus operation.
pub trait ChannelObserver: Send + Sync {
    /// Called whenever this activity's channel's focus or mixing behavior
    /// changes.
    fn on_focus_changed(&self, channel_name: &str, focus: FocusState, mixing_behavior: MixingBehavior);
}

/// Notified of channel focus transitions, without the mixing-behavior
/// hint. Registered independently of any particular activity via
/// `addObserver`/`removeObserver`.
pub trait FocusManagerObserver: Send + Sync {
    /// Called whenever any channel's focus changes.
    fn on_focus_changed(&self, channel_name: &str, focus: FocusState);
}

/// Receives a batch of channel-state updates emitted once per focus
/// operation.
pub trait ActivityTracker: Send + Sync {
    /// Reports the current state of every channel touched by the
    /// triggering operation.
    fn notify_of_activity_updates(&self, updates: &[ChannelStateUpdate]);
}
