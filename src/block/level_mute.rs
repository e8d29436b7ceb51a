//! Channel blocks with subscribed level and mute state.
//!
//! These blocks push their status: one aggregate `mutes` vector and one
//! aggregate `levels` vector per block, updated live by the router. Only
//! the channel topology (count, labels, level ranges) is queried, and only
//! when no usable attribute helper is cached.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use ttp_protocol::{CommandArg, TtpResponse, Value};

use crate::block::channel::{Channel, ChannelAttribute, ChannelMap};
use crate::block::{BlockCtx, BlockError, BlockOps, InitHelper};
use crate::session::command::CommandError;
use crate::session::subscription::{PublishUpdate, SubscribeSpec, SubscriptionSink};

// ---------------------------------------------------------------------------
// Shared channel-block core
// ---------------------------------------------------------------------------

/// Where a channel's display label comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelSource {
    /// Query this attribute per channel (`label`, `channelName`, ...).
    Attribute(&'static str),
    /// The block type has no label attribute; synthesize `{block_id}_{i}`.
    Generated,
}

/// State and behavior shared by every channel-oriented block: the channel
/// map behind a mutex, topology query/restore, and write-through setters.
pub(crate) struct LevelMuteCore {
    pub(crate) ctx: BlockCtx,
    pub(crate) state: Mutex<ChannelMap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelsHelper {
    channels: ChannelMap,
}

impl LevelMuteCore {
    /// Restore the channel map from a helper, or query the device for it.
    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
        labels: LabelSource,
    ) -> Result<Self, BlockError> {
        let channels = match helper.and_then(restore_channels) {
            Some(channels) => channels,
            None => query_topology(&ctx, labels).await?,
        };
        Ok(LevelMuteCore {
            ctx,
            state: Mutex::new(channels),
        })
    }

    pub(crate) fn channels(&self) -> ChannelMap {
        self.state.lock().expect("channel state lock").clone()
    }

    pub(crate) fn export_helper_value(&self) -> serde_json::Value {
        let helper = ChannelsHelper {
            channels: self.channels(),
        };
        serde_json::to_value(helper).expect("channel map serializes")
    }

    /// Apply one routed push to local state.
    pub(crate) fn apply_subscription(&self, block_id: &str, update: &PublishUpdate) {
        match update.subscribe_type.as_str() {
            "mutes" => self.apply_bool_vector(block_id, &update.value, |ch, v| ch.muted = Some(v)),
            "levels" => self.apply_level_vector(block_id, &update.value),
            other => debug!(block_id, subscribe_type = other, "unhandled subscription update"),
        }
    }

    fn apply_bool_vector(&self, block_id: &str, value: &Value, apply: impl Fn(&mut Channel, bool)) {
        let Some(items) = value.as_list() else {
            warn!(block_id, "expected vector payload, got {:?}", value);
            return;
        };
        let mut state = self.state.lock().expect("channel state lock");
        for (i, item) in items.iter().enumerate() {
            let index = i as u32 + 1;
            let Some(flag) = item.as_bool() else { continue };
            match state.get_mut(&index) {
                Some(channel) => apply(channel, flag),
                None => error!(block_id, index, "mute update for unknown channel index"),
            }
        }
    }

    fn apply_level_vector(&self, block_id: &str, value: &Value) {
        let Some(items) = value.as_list() else {
            warn!(block_id, "expected vector payload, got {:?}", value);
            return;
        };
        let mut state = self.state.lock().expect("channel state lock");
        for (i, item) in items.iter().enumerate() {
            let index = i as u32 + 1;
            let Some(level) = item.as_float() else { continue };
            match state.get_mut(&index) {
                Some(channel) => channel.level = Some(level),
                None => error!(block_id, index, "level update for unknown channel index"),
            }
        }
    }

    /// Issue a per-channel set command; on `+OK`, write the new value into
    /// local state (channel 0 fans out to every channel). `-ERR` leaves
    /// local state untouched.
    pub(crate) async fn set_channel(
        &self,
        attribute: ChannelAttribute,
        channel: u32,
        value: impl Into<CommandArg>,
    ) -> Result<TtpResponse, CommandError> {
        let value = value.into();
        let response = self
            .ctx
            .set(attribute.wire_name(), Some(channel), value.clone())
            .await?;
        if response.is_ok() {
            let mut state = self.state.lock().expect("channel state lock");
            if channel == 0 {
                for ch in state.values_mut() {
                    write_through(ch, attribute, &value);
                }
            } else if let Some(ch) = state.get_mut(&channel) {
                write_through(ch, attribute, &value);
            }
        }
        Ok(response)
    }
}

fn write_through(channel: &mut Channel, attribute: ChannelAttribute, value: &CommandArg) {
    match (attribute, value) {
        (ChannelAttribute::Mute, CommandArg::Bool(v)) => channel.muted = Some(*v),
        (ChannelAttribute::Level, CommandArg::Float(v)) => channel.level = Some(*v),
        (ChannelAttribute::Invert, CommandArg::Bool(v)) => channel.inverted = Some(*v),
        (ChannelAttribute::FaultOnInactive, CommandArg::Bool(v)) => {
            channel.fault_on_inactive = Some(*v);
        }
        _ => {}
    }
}

fn restore_channels(helper: &serde_json::Value) -> Option<ChannelMap> {
    match serde_json::from_value::<ChannelsHelper>(helper.clone()) {
        Ok(parsed) if !parsed.channels.is_empty() => Some(parsed.channels),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "cannot use initialization helper, querying instead");
            None
        }
    }
}

/// Query the immutable channel topology: count, labels, level ranges.
pub(crate) async fn query_topology(
    ctx: &BlockCtx,
    labels: LabelSource,
) -> Result<ChannelMap, BlockError> {
    let num_channels = ctx.get_int("numChannels", None).await?;
    let mut channels = ChannelMap::new();
    for index in 1..=num_channels.max(0) as u32 {
        let mut channel = Channel::new(index);
        channel.label = Some(match labels {
            LabelSource::Attribute(attr) => ctx.get_label(attr, Some(index)).await?,
            LabelSource::Generated => format!("{}_{}", ctx.block_id, index),
        });
        channel.min_level = Some(ctx.get_float("minLevel", Some(index)).await?);
        channel.max_level = Some(ctx.get_float("maxLevel", Some(index)).await?);
        channels.insert(index, channel);
    }
    Ok(channels)
}

// ---------------------------------------------------------------------------
// LevelControl
// ---------------------------------------------------------------------------

/// A plain level-control block: per-channel level and mute, both kept live
/// by aggregate subscriptions.
pub struct LevelControl {
    core: LevelMuteCore,
}

impl LevelControl {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let core = LevelMuteCore::create(ctx, helper, LabelSource::Attribute("label")).await?;
        Ok(Arc::new(LevelControl { core }))
    }

    /// Snapshot of the current channel state.
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

impl SubscriptionSink for LevelControl {
    fn subscription_callback(&self, update: &PublishUpdate) {
        self.core.apply_subscription(self.block_id(), update);
    }
}

impl BlockOps for LevelControl {
    fn block_id(&self) -> &str {
        &self.core.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "LevelControl"
    }

    fn export_init_helper(&self) -> InitHelper {
        InitHelper::new(Self::VERSION, self.core.export_helper_value())
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        vec![SubscribeSpec::all("mutes"), SubscribeSpec::all("levels")]
    }
}

// ---------------------------------------------------------------------------
// DanteInput
// ---------------------------------------------------------------------------

/// Dante network input block. Channel labels come from `channelName`
/// (there is no `label` on Dante channels), and each channel additionally
/// carries a subscribed fault-on-inactive flag and an invert setter.
pub struct DanteInput {
    core: LevelMuteCore,
}

impl DanteInput {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let core =
            LevelMuteCore::create(ctx, helper, LabelSource::Attribute("channelName")).await?;
        Ok(Arc::new(DanteInput { core }))
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

    pub async fn set_fault_on_inactive(
        &self,
        value: bool,
        channel: u32,
    ) -> Result<TtpResponse, CommandError> {
        self.core
            .set_channel(ChannelAttribute::FaultOnInactive, channel, value)
            .await
    }
}

impl SubscriptionSink for DanteInput {
    fn subscription_callback(&self, update: &PublishUpdate) {
        if update.subscribe_type == "faultOnInactive" {
            let Some(index) = update.channel else {
                warn!(block_id = %self.block_id(), "faultOnInactive update without channel");
                return;
            };
            let mut state = self.core.state.lock().expect("channel state lock");
            match state.get_mut(&index) {
                Some(channel) => channel.fault_on_inactive = update.value.as_bool(),
                None => error!(
                    block_id = %self.block_id(),
                    index,
                    "faultOnInactive update for unknown channel index"
                ),
            }
            return;
        }
        self.core.apply_subscription(self.block_id(), update);
    }
}

impl BlockOps for DanteInput {
    fn block_id(&self) -> &str {
        &self.core.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "DanteInput"
    }

    fn export_init_helper(&self) -> InitHelper {
        InitHelper::new(Self::VERSION, self.core.export_helper_value())
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        let mut specs = vec![SubscribeSpec::all("mutes"), SubscribeSpec::all("levels")];
        for index in self.core.channels().keys() {
            specs.push(SubscribeSpec::channel("faultOnInactive", *index));
        }
        specs
    }
}
