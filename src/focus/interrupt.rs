//! Interrupt model: the external policy consulted to decide mixing
//! behavior between two simultaneously active channels.

use crate::focus::model::{ContentType, MixingBehavior};

/// Given a lower-priority (backgrounded) channel/content-type and a
/// higher-priority (foreground) channel/content-type, decides the
/// [`MixingBehavior`] the backgrounded channel's observer should receive.
///
/// The focus manager never computes this itself; it only forwards the four
/// inputs. If no interrupt model is configured, the default for any
/// backgrounded channel is [`MixingBehavior::MustPause`].
pub trait InterruptModel: Send + Sync {
    /// Decides the mixing behavior for the lower-priority channel.
    fn get_mixing_behavior(
        &self,
        low_channel: &str,
        low_content_type: &ContentType,
        high_channel: &str,
        high_content_type: &ContentType,
    ) -> MixingBehavior;
}

/// The interrupt model used when none is configured: every backgrounded
/// channel must pause.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysPauseInterruptModel;

impl InterruptModel for AlwaysPauseInterruptModel {
    fn get_mixing_behavior(
        &self,
        _low_channel: &str,
        _low_content_type: &ContentType,
        _high_channel: &str,
        _high_content_type: &ContentType,
    ) -> MixingBehavior {
        MixingBehavior::MustPause
    }
}
