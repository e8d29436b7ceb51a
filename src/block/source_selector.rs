//! Source selector block.
//!
//! Holds a set of selectable sources (indexed from 1), one output with its
//! own mute and level, and a scalar selected-source where 0 means "nothing
//! selected". In stereo mode the device reports channel-pair counts, so
//! the effective source/output counts are half the raw `numInputs` /
//! `numOutputs`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use ttp_protocol::TtpResponse;

use crate::block::{BlockCtx, BlockError, BlockOps, InitHelper};
use crate::session::command::CommandError;
use crate::session::subscription::{PublishUpdate, SubscribeSpec, SubscriptionSink};

/// One selectable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<f64>,

    // Status, never persisted.
    #[serde(skip)]
    pub level: Option<f64>,
    #[serde(skip)]
    pub selected: bool,
}

#[derive(Debug, Default)]
struct SelectorStatus {
    muted: bool,
    selected_source: u32,
    output_level: Option<f64>,
    sources: BTreeMap<u32, Source>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SelectorHelper {
    stereo: bool,
    num_input: u32,
    num_output: u32,
    sources: BTreeMap<u32, Source>,
    min_output_level: Option<f64>,
    max_output_level: Option<f64>,
}

pub struct SourceSelector {
    ctx: BlockCtx,
    stereo: bool,
    num_input: u32,
    num_output: u32,
    min_output_level: Option<f64>,
    max_output_level: Option<f64>,
    status: Mutex<SelectorStatus>,
}

impl SourceSelector {
    pub const VERSION: &'static str = "0.2.0";

    pub(crate) async fn create(
        ctx: BlockCtx,
        helper: Option<&serde_json::Value>,
    ) -> Result<Arc<Self>, BlockError> {
        let restored = helper.and_then(|h| {
            match serde_json::from_value::<SelectorHelper>(h.clone()) {
                Ok(parsed) if !parsed.sources.is_empty() => Some(parsed),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "cannot use initialization helper, querying instead");
                    None
                }
            }
        });
        let block = match restored {
            Some(parsed) => SourceSelector {
                ctx,
                stereo: parsed.stereo,
                num_input: parsed.num_input,
                num_output: parsed.num_output,
                min_output_level: parsed.min_output_level,
                max_output_level: parsed.max_output_level,
                status: Mutex::new(SelectorStatus {
                    sources: parsed.sources,
                    ..SelectorStatus::default()
                }),
            },
            None => Self::query_attributes(ctx).await?,
        };
        Ok(Arc::new(block))
    }

    async fn query_attributes(ctx: BlockCtx) -> Result<Self, BlockError> {
        let stereo = ctx.get_bool("stereoEnable", None).await?;
        let mut num_input = ctx.get_int("numInputs", None).await?.max(0) as u32;
        let mut num_output = ctx.get_int("numOutputs", None).await?.max(0) as u32;
        let muted = ctx.get_bool("outputMute", None).await?;

        // Stereo pairs: the device counts per physical channel.
        if stereo {
            num_input /= 2;
            num_output /= 2;
        }

        let mut sources = BTreeMap::new();
        for index in 1..=num_input {
            sources.insert(
                index,
                Source {
                    index,
                    label: Some(ctx.get_label("label", Some(index)).await?),
                    min_level: Some(ctx.get_float("sourceMinLevel", Some(index)).await?),
                    max_level: Some(ctx.get_float("sourceMaxLevel", Some(index)).await?),
                    level: None,
                    selected: false,
                },
            );
        }

        let min_output_level = Some(ctx.get_float("outputMinLevel", None).await?);
        let max_output_level = Some(ctx.get_float("outputMaxLevel", None).await?);

        Ok(SourceSelector {
            ctx,
            stereo,
            num_input,
            num_output,
            min_output_level,
            max_output_level,
            status: Mutex::new(SelectorStatus {
                muted,
                selected_source: 0,
                output_level: None,
                sources,
            }),
        })
    }

    pub fn stereo(&self) -> bool {
        self.stereo
    }

    pub fn num_input(&self) -> u32 {
        self.num_input
    }

    pub fn num_output(&self) -> u32 {
        self.num_output
    }

    pub fn min_output_level(&self) -> Option<f64> {
        self.min_output_level
    }

    pub fn max_output_level(&self) -> Option<f64> {
        self.max_output_level
    }

    pub fn muted(&self) -> bool {
        self.status.lock().expect("selector status lock").muted
    }

    /// Currently selected source index; 0 means no selection.
    pub fn selected_source(&self) -> u32 {
        self.status
            .lock()
            .expect("selector status lock")
            .selected_source
    }

    pub fn output_level(&self) -> Option<f64> {
        self.status.lock().expect("selector status lock").output_level
    }

    /// Snapshot of the source table.
    pub fn sources(&self) -> BTreeMap<u32, Source> {
        self.status
            .lock()
            .expect("selector status lock")
            .sources
            .clone()
    }

    pub async fn set_output_mute(&self, value: bool) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set("outputMute", None, value).await?;
        if response.is_ok() {
            self.status.lock().expect("selector status lock").muted = value;
        }
        Ok(response)
    }

    pub async fn set_output_level(&self, value: f64) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set("outputLevel", None, value).await?;
        if response.is_ok() {
            self.status
                .lock()
                .expect("selector status lock")
                .output_level = Some(value);
        }
        Ok(response)
    }

    /// Select a source, or 0 to deselect everything.
    pub async fn select_source(&self, source: u32) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set("sourceSelection", None, source).await?;
        if response.is_ok() {
            let mut status = self.status.lock().expect("selector status lock");
            apply_selection(&mut status, source);
        }
        Ok(response)
    }

    pub async fn set_source_level(
        &self,
        source: u32,
        value: f64,
    ) -> Result<TtpResponse, CommandError> {
        let response = self.ctx.set("sourceLevel", Some(source), value).await?;
        if response.is_ok()
            && let Some(entry) = self
                .status
                .lock()
                .expect("selector status lock")
                .sources
                .get_mut(&source)
        {
            entry.level = Some(value);
        }
        Ok(response)
    }
}

fn apply_selection(status: &mut SelectorStatus, selected: u32) {
    status.selected_source = selected;
    for (index, source) in status.sources.iter_mut() {
        source.selected = *index == selected;
    }
}

impl SubscriptionSink for SourceSelector {
    fn subscription_callback(&self, update: &PublishUpdate) {
        let mut status = self.status.lock().expect("selector status lock");
        match update.subscribe_type.as_str() {
            "outputMute" => {
                if let Some(muted) = update.value.as_bool() {
                    status.muted = muted;
                    debug!(block_id = %self.ctx.block_id, muted, "output mute changed");
                }
            }
            "outputLevel" => {
                if let Some(level) = update.value.as_float() {
                    status.output_level = Some(level);
                    debug!(block_id = %self.ctx.block_id, level, "output level changed");
                }
            }
            "sourceSelection" => {
                if let Some(selected) = update.value.as_int().and_then(|i| u32::try_from(i).ok()) {
                    apply_selection(&mut status, selected);
                    debug!(block_id = %self.ctx.block_id, selected, "source selection changed");
                }
            }
            "sourceLevel" => {
                let Some(index) = update.channel else {
                    warn!(block_id = %self.ctx.block_id, "sourceLevel update without channel");
                    return;
                };
                match status.sources.get_mut(&index) {
                    Some(source) => source.level = update.value.as_float(),
                    None => {
                        error!(block_id = %self.ctx.block_id, index, "source level update for unknown source");
                    }
                }
            }
            other => {
                debug!(block_id = %self.ctx.block_id, subscribe_type = other, "unhandled subscription update");
            }
        }
    }
}

impl BlockOps for SourceSelector {
    fn block_id(&self) -> &str {
        &self.ctx.block_id
    }

    fn type_name(&self) -> &'static str {
        "SourceSelector"
    }

    fn export_init_helper(&self) -> InitHelper {
        let helper = SelectorHelper {
            stereo: self.stereo,
            num_input: self.num_input,
            num_output: self.num_output,
            sources: self.sources(),
            min_output_level: self.min_output_level,
            max_output_level: self.max_output_level,
        };
        InitHelper::new(
            Self::VERSION,
            serde_json::to_value(helper).expect("helper serializes"),
        )
    }

    fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        let mut specs = vec![
            SubscribeSpec::all("outputMute"),
            SubscribeSpec::all("outputLevel"),
            SubscribeSpec::all("sourceSelection"),
        ];
        for index in self.sources().keys() {
            specs.push(SubscribeSpec::channel("sourceLevel", *index));
        }
        specs
    }
}
