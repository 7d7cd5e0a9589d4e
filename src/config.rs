use derivative::Derivative;
use std::time::Duration;

/// Name and priority of one focus-manager channel.
///
/// Lower `priority` wins: a channel with `priority: 1` preempts one with
/// `priority: 2`. Names and priorities must be unique within a single
/// [`Config`]'s combined physical + virtual channel lists; a colliding
/// entry is skipped with a warning when the [`FocusManager`] is built.
///
/// [`FocusManager`]: crate::focus::manager::FocusManager
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelConfig {
    /// The channel's name, e.g. `"dialog"`.
    pub name: String,
    /// The channel's priority; lower numbers win.
    pub priority: u32,
}

impl ChannelConfig {
    /// Builds a channel configuration entry.
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// Configuration shared across the directive processor, focus manager, and
/// dialog UX aggregator.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Physical audio/visual channels managed by the focus manager.
    ///
    /// Defaults to [`Config::default_audio_channels`].
    pub channels: Vec<ChannelConfig>,
    /// Virtual channels managed by the focus manager, layered above the
    /// physical ones for callers that need a second independent priority
    /// space (e.g. visual surfaces).
    ///
    /// Defaults to empty.
    pub virtual_channels: Vec<ChannelConfig>,
    /// Upper bound on time spent in `THINKING` with no further speech
    /// start, after which the dialog UX aggregator forces `IDLE`.
    ///
    /// Defaults to 8000ms.
    pub thinking_to_idle: Duration,
    /// Restart window used after a message notification arrives, to
    /// distinguish "speech about to start" from "directive unrelated to
    /// speech".
    ///
    /// Defaults to 200ms.
    pub short_thinking_to_idle: Duration,
    /// Bound on time spent in `LISTENING` waiting for
    /// `onRequestProcessingStarted`, after which the dialog UX aggregator
    /// forces `IDLE`.
    ///
    /// Defaults to 8000ms.
    pub listening_to_idle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: Self::default_audio_channels(),
            virtual_channels: Self::default_visual_channels(),
            thinking_to_idle: Duration::from_millis(8000),
            short_thinking_to_idle: Duration::from_millis(200),
            listening_to_idle: Duration::from_millis(8000),
        }
    }
}

impl Config {
    /// The default physical audio channel list: `dialog` > `alerts` >
    /// `communications` > `content`, with strictly increasing priority
    /// numbers.
    #[must_use]
    pub fn default_audio_channels() -> Vec<ChannelConfig> {
        vec![
            ChannelConfig::new("dialog", 1),
            ChannelConfig::new("alerts", 2),
            ChannelConfig::new("communications", 3),
            ChannelConfig::new("content", 4),
        ]
    }

    /// The default virtual/visual channel list. Empty by default; callers
    /// needing a visual-focus channel space should supply their own.
    #[must_use]
    pub fn default_visual_channels() -> Vec<ChannelConfig> {
        Vec::new()
    }

    /// Replaces the physical channel list.
    #[must_use]
    pub fn channels(mut self, channels: Vec<ChannelConfig>) -> Self {
        self.channels = channels;
        self
    }

    /// Replaces the virtual channel list.
    #[must_use]
    pub fn virtual_channels(mut self, channels: Vec<ChannelConfig>) -> Self {
        self.virtual_channels = channels;
        self
    }

    /// Sets the long-thinking timeout.
    #[must_use]
    pub fn thinking_to_idle(mut self, duration: Duration) -> Self {
        self.thinking_to_idle = duration;
        self
    }

    /// Sets the short-thinking timeout.
    #[must_use]
    pub fn short_thinking_to_idle(mut self, duration: Duration) -> Self {
        self.short_thinking_to_idle = duration;
        self
    }

    /// Sets the listening-to-idle timeout.
    #[must_use]
    pub fn listening_to_idle(mut self, duration: Duration) -> Self {
        self.listening_to_idle = duration;
        self
    }
}

#[cfg(test)]
impl Config {
    /// A `Config` with short timers, convenient for tests that need to
    /// observe timer-driven transitions without waiting out production
    /// defaults.
    pub(crate) fn test_cfg() -> Self {
        Self::default()
            .thinking_to_idle(Duration::from_millis(50))
            .short_thinking_to_idle(Duration::from_millis(10))
            .listening_to_idle(Duration::from_millis(50))
    }
}
