//! Channel blocks without subscription support.
//!
//! The device offers no push stream for these types, so mute/level status
//! is fetched per channel at construction and again whenever the caller
//! asks for a manual `refresh_status`. Between refreshes the local copy
//! may lag the device — that is the accepted trade-off for these blocks.

use std::sync::Arc;

use tracing::debug;
use ttp_protocol::TtpResponse;

use crate::block::channel::{ChannelAttribute, ChannelMap};
use crate::block::level_mute::{LabelSource, LevelMuteCore};
use crate::block::{BlockCtx, BlockError, BlockOps, InitHelper};
use crate::session::command::CommandError;
use crate::session::subscription::{PublishUpdate, SubscribeSpec, SubscriptionSink};

/// Re-query mute and level for every channel.
async fn query_status(core: &LevelMuteCore) -> Result<(), BlockError> {
    let indices: Vec<u32> = core.channels().keys().copied().collect();
    for index in indices {
        let muted = core.ctx.get_bool("mute", Some(index)).await?;
        let level = core.ctx.get_float("level", Some(index)).await?;
        let mut state = core.state.lock().expect("channel state lock");
        if let Some(channel) = state.get_mut(&index) {
            channel.muted = Some(muted);
            channel.level = Some(level);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Built-in device output block. No push support, no label attribute
/// (labels are synthesized), but each channel has an invert flag.
pub struct AudioOutput {
    core: LevelMuteCore,
}

impl AudioOutput {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let core = LevelMuteCore::create(ctx, helper, LabelSource::Generated).await?;
        let block = AudioOutput { core };
        block.query_status().await?;
        Ok(Arc::new(block))
    }

    async fn query_status(&self) -> Result<(), BlockError> {
        query_status(&self.core).await?;
        let indices: Vec<u32> = self.core.channels().keys().copied().collect();
        for index in indices {
            let inverted = self.core.ctx.get_bool("invert", Some(index)).await?;
            let mut state = self.core.state.lock().expect("channel state lock");
            if let Some(channel) = state.get_mut(&index) {
                channel.inverted = Some(inverted);
            }
        }
        Ok(())
    }

    /// Manually re-poll the block's status attributes.
    pub async fn refresh_status(&self) -> Result<(), BlockError> {
        self.query_status().await
    }

    pub fn channels(&self) -> ChannelMap {
        self.core.channels()
    }

    pub async fn set_mute(&self, value: bool, channel: u32) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::Mute, channel, value)
            .await
    }

    pub async fn set_level(&self, value: f64, channel: u32) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::Level, channel, value)
            .await
    }

    pub async fn set_invert(&self, value: bool, channel: u32) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::Invert, channel, value)
            .await
    }
}

impl SubscriptionSink for AudioOutput {
    fn subscription_callback(&self, update: &PublishUpdate) {
        debug!(
            block_id = %self.block_id(),
            subscribe_type = %update.subscribe_type,
            "unexpected subscription update for polled block"
        );
    }
}

impl BlockOps for AudioOutput {
    fn block_id(&self) -> &str {
        &self.core.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "AudioOutput"
    }

    fn export_init_helper(&self) -> InitHelper {
        InitHelper::new(Self::VERSION, self.core.export_helper_value())
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// NoiseGenerator
// ---------------------------------------------------------------------------

/// Noise generator block: polled level/mute channels with synthesized
/// labels, nothing else.
pub struct NoiseGenerator {
    core: LevelMuteCore,
}

impl NoiseGenerator {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let core = LevelMuteCore::create(ctx, helper, LabelSource::Generated).await?;
        query_status(&core).await?;
        Ok(Arc::new(NoiseGenerator { core }))
    }

    /// Manually re-poll the block's status attributes.
    pub async fn refresh_status(&self) -> Result<(), BlockError> {
        query_status(&self.core).await
    }

    pub fn channels(&self) -> ChannelMap {
        self.core.channels()
    }

    pub async fn set_mute(&self, value: bool, channel: u32) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::Mute, channel, value)
            .await
    }

    pub async fn set_level(&self, value: f64, channel: u32) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::Level, channel, value)
            .await
    }
}

impl SubscriptionSink for NoiseGenerator {
    fn subscription_callback(&self, update: &PublishUpdate) {
        debug!(
            block_id = %self.block_id(),
            subscribe_type = %update.subscribe_type,
            "unexpected subscription update for polled block"
        );
    }
}

impl BlockOps for NoiseGenerator {
    fn block_id(&self) -> &str {
        &self.core.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "NoiseGenerator"
    }

    fn export_init_helper(&self) -> InitHelper {
        InitHelper::new(Self::VERSION, self.core.export_helper_value())
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        Vec::new()
    }
}
