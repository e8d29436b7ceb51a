//! Ducker block: a compound of scalar sense/threshold/timing attributes.
//!
//! Nothing here is subscribable, and practically everything is runtime
//! status, so the block re-queries the full scalar set on construction and
//! on every manual `refresh_status`. The attribute helper stays empty —
//! there is no immutable topology worth caching.

use std::sync::{Arc, Mutex};

use tracing::debug;
use ttp_protocol::TtpResponse;

use crate::block::{BlockCtx, BlockError, BlockOps, InitHelper};
use crate::session::command::CommandError;
use crate::session::subscription::{PublishUpdate, SubscribeSpec, SubscriptionSink};

/// Current ducker status. `None` until the first query completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuckerState {
    pub mix_sense: Option<bool>,
    pub sense_level: Option<f64>,
    pub sense_mute: Option<bool>,
    pub threshold: Option<f64>,
    pub ducking_level: Option<f64>,
    pub attack_time: Option<f64>,
    pub release_time: Option<f64>,
    pub input_mute: Option<bool>,
    pub input_level: Option<f64>,
    pub min_input_level: Option<f64>,
    pub max_input_level: Option<f64>,
    pub bypass: Option<bool>,
}

pub struct Ducker {
    ctx: BlockCtx,
    state: Mutex<DuckerState>,
}

impl Ducker {
    pub const VERSION: &'static str = "0.1.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        _helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let block = Ducker {
            ctx,
            state: Mutex::new(DuckerState::default()),
        };
        block.query_status().await?;
        Ok(Arc::new(block))
    }

    async fn query_status(&self) -> Result<(), BlockError> {
        let state = DuckerState {
            mix_sense: Some(self.ctx.get_bool("mixSense", None).await?),
            sense_level: Some(self.ctx.get_float("senseLevel", None).await?),
            sense_mute: Some(self.ctx.get_bool("senseMute", None).await?),
            threshold: Some(self.ctx.get_float("threshold", None).await?),
            ducking_level: Some(self.ctx.get_float("duckingLevel", None).await?),
            attack_time: Some(self.ctx.get_float("attackTime", None).await?),
            release_time: Some(self.ctx.get_float("releaseTime", None).await?),
            input_mute: Some(self.ctx.get_bool("inputMute", None).await?),
            input_level: Some(self.ctx.get_float("inputLevel", None).await?),
            min_input_level: Some(self.ctx.get_float("minInputLevel", None).await?),
            max_input_level: Some(self.ctx.get_float("maxInputLevel", None).await?),
            bypass: Some(self.ctx.get_bool("bypass", None).await?),
        };
        *self.state.lock().expect("ducker state lock") = state;
        Ok(())
    }

    /// Manually re-poll the block's status attributes.
    pub async fn refresh_status(&self) -> Result<(), BlockError> {
        self.query_status().await
    }

    /// Snapshot of the current scalar state.
    pub fn state(&self) -> DuckerState {
        self.state.lock().expect("ducker state lock").clone()
    }

    async fn set_bool(
        &self,
        attribute: &str,
        value: bool,
        apply: impl Fn(&mut DuckerState),
    ) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set(attribute, None, value).await?;
        if response.is_ok() {
            apply(&mut self.state.lock().expect("ducker state lock"));
        }
        Ok(response)
    }

    async fn set_float(
        &self,
        attribute: &str,
        value: f64,
        apply: impl Fn(&mut DuckerState),
    ) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set(attribute, None, value).await?;
        if response.is_ok() {
            apply(&mut self.state.lock().expect("ducker state lock"));
        }
        Ok(response)
    }

    pub async fn set_bypass(&self, value: bool) -> Result<TtpResponse, CommandError> {
        self.set_bool("bypass", value, |s| s.bypass = Some(value)).await
    }

    pub async fn set_mix_sense(&self, value: bool) -> Result<TtpResponse, CommandError> {
        self.set_bool("mixSense", value, |s| s.mix_sense = Some(value))
            .await
    }

    pub async fn set_sense_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("senseLevel", value, |s| s.sense_level = Some(value))
            .await
    }

    pub async fn set_sense_mute(&self, value: bool) -> Result<TtpResponse, CommandError> {
        self.set_bool("senseMute", value, |s| s.sense_mute = Some(value))
            .await
    }

    pub async fn set_threshold(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("threshold", value, |s| s.threshold = Some(value))
            .await
    }

    pub async fn set_ducking_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("duckingLevel", value, |s| s.ducking_level = Some(value))
            .await
    }

    pub async fn set_attack_time(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("attackTime", value, |s| s.attack_time = Some(value))
            .await
    }

    pub async fn set_release_time(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("releaseTime", value, |s| s.release_time = Some(value))
            .await
    }

    pub async fn set_input_mute(&self, value: bool) -> Result<TtpResponse, CommandError> {
        self.set_bool("inputMute", value, |s| s.input_mute = Some(value))
            .await
    }

    pub async fn set_input_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("inputLevel", value, |s| s.input_level = Some(value))
            .await
    }

    pub async fn set_min_input_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("minInputLevel", value, |s| s.min_input_level = Some(value))
            .await
    }

    pub async fn set_max_input_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        self.set_float("maxInputLevel", value, |s| s.max_input_level = Some(value))
            .await
    }
}

impl SubscriptionSink for Ducker {
    fn subscription_callback(&self, update: &PublishUpdate) {
        debug!(
            block_id = %self.ctx.block_id,
            subscribe_type = %update.subscribe_type,
            "unexpected subscription update for polled block"
        );
    }
}

impl BlockOps for Ducker {
    fn block_id(&self) -> &str {
        &self.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "Ducker"
    }

    fn export_init_helper(&self) -> InitHelper {
        // All ducker attributes are runtime status; nothing to cache.
        InitHelper::new(Self::VERSION, serde_json::json!({}))
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        Vec::new()
    }
}
