//! Channels, activities, and the focus/mixing enums arbitrated by the
//! [`FocusManager`](crate::focus::manager::FocusManager).

use std::fmt;

/// Current focus state of a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FocusState {
    /// This channel is the single foreground channel.
    Foreground,
    /// This channel is active but not foreground.
    Background,
    /// This channel has no active owner.
    None,
}

impl fmt::Display for FocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FocusState::Foreground => write!(f, "FOREGROUND"),
            FocusState::Background => write!(f, "BACKGROUND"),
            FocusState::None => write!(f, "NONE"),
        }
    }
}

/// A hint, alongside a focus transition, telling a backgrounded (or
/// newly-backgrounded) observer whether to stop, pause, duck, or mix with
/// the foreground activity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum MixingBehavior {
    /// This activity is the primary (foreground) activity.
    Primary,
    /// This activity may continue at reduced volume.
    MayDuck,
    /// This activity must pause and may resume later.
    MustPause,
    /// This activity must stop outright.
    MustStop,
    /// No interrupt model was available to decide; treat conservatively.
    Undefined,
}

impl fmt::Display for MixingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixingBehavior::Primary => write!(f, "PRIMARY"),
            MixingBehavior::MayDuck => write!(f, "MAY_DUCK"),
            MixingBehavior::MustPause => write!(f, "MUST_PAUSE"),
            MixingBehavior::MustStop => write!(f, "MUST_STOP"),
            MixingBehavior::Undefined => write!(f, "UNDEFINED"),
        }
    }
}

/// Drives mixing decisions between two simultaneously active channels.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContentType(pub String);

impl ContentType {
    /// Builds a content type from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(interface-name, observer, content-type)` bound to a channel while
/// it is active.
#[derive(Clone)]
pub struct Activity {
    /// The logical module name that acquired the channel, e.g. `"speech"`.
    pub interface_name: String,
    /// Receives focus transitions for this activity's channel.
    pub observer: std::sync::Arc<dyn crate::focus::observer::ChannelObserver>,
    /// Drives mixing decisions against other active channels.
    pub content_type: ContentType,
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("interface_name", &self.interface_name)
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl Activity {
    /// Builds an activity.
    pub fn new(
        interface_name: impl Into<String>,
        observer: std::sync::Arc<dyn crate::focus::observer::ChannelObserver>,
        content_type: ContentType,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            observer,
            content_type,
        }
    }
}

/// A named, strictly-prioritized resource arbitrated by the focus manager.
///
/// Two channels in one [`FocusManager`](crate::focus::manager::FocusManager)
/// must not share a name or a priority.
#[derive(Clone)]
pub struct Channel {
    /// This channel's name, e.g. `"dialog"`.
    pub name: String,
    /// This channel's priority; lower numbers win.
    pub priority: u32,
    /// This channel's current focus state.
    pub focus: FocusState,
    /// The primary activity currently bound to this channel, if any.
    pub primary_activity: Option<Activity>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("focus", &self.focus)
            .field(
                "primary_activity",
                &self.primary_activity.as_ref().map(|a| &a.interface_name),
            )
            .finish()
    }
}

impl Channel {
    /// Builds an unoccupied channel.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            focus: FocusState::None,
            primary_activity: None,
        }
    }
}

/// A snapshot of one channel's focus state, used for
/// [`ActivityTracker`](crate::focus::observer::ActivityTracker) updates.
#[derive(Clone, Debug)]
pub struct ChannelStateUpdate {
    /// The channel's name.
    pub channel_name: String,
    /// The interface currently bound to the channel, if any.
    pub interface_name: Option<String>,
    /// The channel's focus state at the time of the update.
    pub focus: FocusState,
}
