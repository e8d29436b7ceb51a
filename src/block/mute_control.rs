//! Mute control block: labeled channels with a subscribed mute vector and
//! an optional ganged mode. No level support.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use ttp_protocol::TtpResponse;

use crate::block::channel::{Channel, ChannelMap};
use crate::block::{BlockCtx, BlockError, BlockOps, InitHelper};
use crate::session::command::CommandError;
use crate::session::subscription::{PublishUpdate, SubscribeSpec, SubscriptionSink};

pub struct MuteControl {
    ctx: BlockCtx,
    ganged: bool,
    state: Mutex<ChannelMap>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MuteControlHelper {
    ganged: bool,
    channels: ChannelMap,
}

impl MuteControl {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let restored = helper.and_then(|h| {
            match serde_json::from_value::<MuteControlHelper>(h.clone()) {
                Ok(parsed) if !parsed.channels.is_empty() => Some(parsed),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "cannot use initialization helper, querying instead");
                    None
                }
            }
        });
        let (ganged, channels) = match restored {
            Some(parsed) => (parsed.ganged, parsed.channels),
            None => Self::query_attributes(&ctx).await?,
        };
        Ok(Arc::new(MuteControl {
            ctx,
            ganged,
            state: Mutex::new(channels),
        }))
    }

    async fn query_attributes(ctx: &BlockCtx) -> Result<(bool, ChannelMap), BlockError> {
        let ganged = ctx.get_bool("ganged", None).await?;
        let num_channels = ctx.get_int("numChannels", None).await?;
        let mut channels = ChannelMap::new();
        for index in 1..=num_channels.max(0) as u32 {
            let mut channel = Channel::new(index);
            channel.label = Some(ctx.get_label("label", Some(index)).await?);
            channels.insert(index, channel);
        }
        Ok((ganged, channels))
    }

    pub fn ganged(&self) -> bool {
        self.ganged
    }

    pub fn channels(&self) -> ChannelMap {
        self.state.lock().expect("channel state lock").clone()
    }

    pub async fn set_mute(&self, value: bool, channel: u32) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set("mute", Some(channel), value).await?;
        if response.is_ok() {
            let mut state = self.state.lock().expect("channel state lock");
            if channel == 0 {
                for ch in state.values_mut() {
                    ch.muted = Some(value);
                }
            } else if let Some(ch) = state.get_mut(&channel) {
                ch.muted = Some(value);
            }
        }
        Ok(response)
    }
}

impl SubscriptionSink for MuteControl {
    fn subscription_callback(&self, update: &PublishUpdate) {
        if update.subscribe_type != "mutes" {
            debug!(
                block_id = %self.ctx.block_id,
                subscribe_type = %update.subscribe_type,
                "unhandled subscription update"
            );
            return;
        }
        let Some(items) = update.value.as_list() else {
            warn!(block_id = %self.ctx.block_id, "expected mute vector, got {:?}", update.value);
            return;
        };
        let mut state = self.state.lock().expect("channel state lock");
        for (i, item) in items.iter().enumerate() {
            let index = i as u32 + 1;
            let Some(muted) = item.as_bool() else { continue };
            match state.get_mut(&index) {
                Some(channel) => channel.muted = Some(muted),
                None => {
                    error!(block_id = %self.ctx.block_id, index, "mute update for unknown channel index");
                }
            }
        }
    }
}

impl BlockOps for MuteControl {
    fn block_id(&self) -> &str {
        &self.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "MuteControl"
    }

    fn export_init_helper(&self) -> InitHelper {
        let helper = MuteControlHelper {
            ganged: self.ganged,
            channels: self.channels(),
        };
        InitHelper::new(
            Self::VERSION,
            serde_json::to_value(helper).expect("helper serializes"),
        )
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        vec![SubscribeSpec::all("mutes")]
    }
}
