//! Block object framework.
//!
//! Every addressable DSP block is a specialization of the same small
//! surface: construct from a cached attribute helper or a live query,
//! register subscriptions, absorb routed pushes, expose typed setters that
//! write through on `+OK`, and export a versioned helper for the next
//! session's cache.
//!
//! Block types compose capabilities instead of inheriting: the dyn-safe
//! [`BlockOps`] trait is what the framework calls through, and the
//! type-name → constructor mapping in [`instantiate`] is the compile-time
//! block registry. Typed access for API consumers goes through
//! [`BlockHandle`].

mod channel;
mod ducker;
mod level_mute;
mod level_mute_polled;
mod mute_control;
mod source_selector;

pub use channel::{Channel, ChannelAttribute, ChannelMap};
pub use ducker::Ducker;
pub use level_mute::{DanteInput, LevelControl};
pub use level_mute_polled::{AudioOutput, NoiseGenerator};
pub use mute_control::MuteControl;
pub use source_selector::{Source, SourceSelector};

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ttp_protocol::{CommandArg, TtpResponse, Value, get_command, set_command};

use crate::session::command::{CommandError, CommandQueue};
use crate::session::subscription::{SubscribeSpec, SubscriptionSink};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A block that fails to construct is omitted from the live catalog; these
/// never fail the session as a whole.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The device answered `-ERR` to a required attribute query.
    #[error("device rejected '{attribute}': {message}")]
    Device { attribute: String, message: String },
    /// The reply parsed but did not carry the expected value shape.
    #[error("unexpected reply for '{attribute}': {detail}")]
    Unexpected { attribute: String, detail: String },
}

// ---------------------------------------------------------------------------
// Construction context
// ---------------------------------------------------------------------------

/// Everything a block needs from the session: its id, the command queue,
/// and the shared connected flag. Subscription registration stays with the
/// session (connect and the poller drive it), so blocks never hold the
/// registry themselves.
#[derive(Clone)]
pub struct BlockCtx {
    pub(crate) block_id: String,
    pub(crate) queue: CommandQueue,
    #[allow(dead_code)]
    pub(crate) connected: Arc<AtomicBool>,
}

impl BlockCtx {
    pub(crate) async fn get(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<TtpResponse, CommandError> {
        self.queue
            .submit(get_command(&self.block_id, attribute, channel))
            .await
    }

    pub(crate) async fn set(
        &self,
        attribute: &str,
        channel: Option<u32>,
        value: impl Into<CommandArg>,
    ) -> Result<TtpResponse, CommandError> {
        self.queue
            .submit(set_command(&self.block_id, attribute, channel, value))
            .await
    }

    /// Query an attribute and require a decoded `+OK` payload.
    pub(crate) async fn get_value(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<Value, BlockError> {
        let response = self.get(attribute, channel).await?;
        if let Some(message) = response.error_message() {
            return Err(BlockError::Device {
                attribute: attribute.to_owned(),
                message: message.to_owned(),
            });
        }
        Ok(response.value().cloned().unwrap_or(Value::Null))
    }

    pub(crate) async fn get_int(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<i64, BlockError> {
        let value = self.get_value(attribute, channel).await?;
        value.as_int().ok_or_else(|| BlockError::Unexpected {
            attribute: attribute.to_owned(),
            detail: format!("expected integer, got {:?}", value),
        })
    }

    pub(crate) async fn get_float(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<f64, BlockError> {
        let value = self.get_value(attribute, channel).await?;
        value.as_float().ok_or_else(|| BlockError::Unexpected {
            attribute: attribute.to_owned(),
            detail: format!("expected number, got {:?}", value),
        })
    }

    pub(crate) async fn get_bool(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<bool, BlockError> {
        let value = self.get_value(attribute, channel).await?;
        value.as_bool().ok_or_else(|| BlockError::Unexpected {
            attribute: attribute.to_owned(),
            detail: format!("expected boolean, got {:?}", value),
        })
    }

    /// Query a textual attribute; an `-ERR` reply reads as an empty string
    /// (some block types have no label support on some attributes).
    pub(crate) async fn get_label(
        &self,
        attribute: &str,
        channel: Option<u32>,
    ) -> Result<String, CommandError> {
        let response = self.get(attribute, channel).await?;
        Ok(match response.value() {
            Some(Value::Str(s)) => s.trim().to_owned(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Attribute helper
// ---------------------------------------------------------------------------

/// The cached, versioned per-block attribute record from the block map.
///
/// `version` is the owning block type's code version; a mismatch means the
/// schema may have drifted and the helper is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitHelper {
    pub version: String,
    pub helper: serde_json::Value,
}

impl InitHelper {
    pub(crate) fn new(version: &str, helper: serde_json::Value) -> Self {
        InitHelper {
            version: version.to_owned(),
            helper,
        }
    }

    /// A helper is usable only when its version matches the live block
    /// type's version and it actually carries data.
    pub(crate) fn usable_for(&self, expected_version: &str) -> Option<&serde_json::Value> {
        if self.version != expected_version {
            return None;
        }
        match self.helper.as_object() {
            Some(map) if !map.is_empty() => Some(&self.helper),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Common block surface
// ---------------------------------------------------------------------------

/// The dyn-safe surface the framework drives blocks through.
///
/// Everything here is synchronous and non-blocking; command traffic always
/// goes through the block's own typed methods.
pub trait BlockOps: SubscriptionSink {
    fn block_id(&self) -> &str;
    fn type_name(&self) -> &'static str;
    /// Serializable topology snapshot for the next session's block map.
    fn export_init_helper(&self) -> InitHelper;
    /// The subscriptions this block keeps alive; empty for polled blocks.
    /// Re-issued wholesale by the poller on every refresh cycle.
    fn base_subscriptions(&self) -> Vec<SubscribeSpec>;
}

// ---------------------------------------------------------------------------
// Typed handles + compile-time registry
// ---------------------------------------------------------------------------

/// A live block, typed. Match to reach the concrete API.
#[derive(Clone)]
pub enum BlockHandle {
    LevelControl(Arc<LevelControl>),
    DanteInput(Arc<DanteInput>),
    MuteControl(Arc<MuteControl>),
    AudioOutput(Arc<AudioOutput>),
    NoiseGenerator(Arc<NoiseGenerator>),
    Ducker(Arc<Ducker>),
    SourceSelector(Arc<SourceSelector>),
}

macro_rules! with_block {
    ($handle:expr, $block:ident => $body:expr) => {
        match $handle {
            BlockHandle::LevelControl($block) => $body,
            BlockHandle::DanteInput($block) => $body,
            BlockHandle::MuteControl($block) => $body,
            BlockHandle::AudioOutput($block) => $body,
            BlockHandle::NoiseGenerator($block) => $body,
            BlockHandle::Ducker($block) => $body,
            BlockHandle::SourceSelector($block) => $body,
        }
    };
}

impl BlockHandle {
    pub fn block_id(&self) -> &str {
        with_block!(self, b => b.block_id())
    }

    pub fn type_name(&self) -> &'static str {
        with_block!(self, b => b.type_name())
    }

    pub fn export_init_helper(&self) -> InitHelper {
        with_block!(self, b => b.export_init_helper())
    }

    pub(crate) fn base_subscriptions(&self) -> Vec<SubscribeSpec> {
        with_block!(self, b => b.base_subscriptions())
    }

    pub(crate) fn as_sink(&self) -> Arc<dyn SubscriptionSink> {
        with_block!(self, b => Arc::clone(b) as Arc<dyn SubscriptionSink>)
    }

    pub fn as_level_control(&self) -> Option<&Arc<LevelControl>> {
        match self {
            BlockHandle::LevelControl(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_dante_input(&self) -> Option<&Arc<DanteInput>> {
        match self {
            BlockHandle::DanteInput(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_mute_control(&self) -> Option<&Arc<MuteControl>> {
        match self {
            BlockHandle::MuteControl(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_audio_output(&self) -> Option<&Arc<AudioOutput>> {
        match self {
            BlockHandle::AudioOutput(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_noise_generator(&self) -> Option<&Arc<NoiseGenerator>> {
        match self {
            BlockHandle::NoiseGenerator(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_ducker(&self) -> Option<&Arc<Ducker>> {
        match self {
            BlockHandle::Ducker(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_source_selector(&self) -> Option<&Arc<SourceSelector>> {
        match self {
            BlockHandle::SourceSelector(b) => Some(b),
            _ => None,
        }
    }
}

/// Code version of a supported block type, for helper gating. `None` means
/// the type has no implementation here.
pub(crate) fn type_version(type_name: &str) -> Option<&'static str> {
    match type_name {
        "LevelControl" => Some(LevelControl::VERSION),
        "DanteInput" => Some(DanteInput::VERSION),
        "MuteControl" => Some(MuteControl::VERSION),
        "AudioOutput" => Some(AudioOutput::VERSION),
        "NoiseGenerator" => Some(NoiseGenerator::VERSION),
        "Ducker" => Some(Ducker::VERSION),
        "SourceSelector" => Some(SourceSelector::VERSION),
        _ => None,
    }
}

/// The block registry: type name → constructor.
///
/// `helper` must already be version-gated by the caller. `Ok(None)` means
/// the type is unsupported (the block is omitted, never an error).
pub(crate) async fn instantiate(
    type_name: &str,
    ctx: BlockCtx,
    helper: Option<&serde_json::Value>,
) -> Result<Option<BlockHandle>, BlockError> {
    let handle = match type_name {
        "LevelControl" => BlockHandle::LevelControl(LevelControl::create(ctx, helper).await?),
        "DanteInput" => BlockHandle::DanteInput(DanteInput::create(ctx, helper).await?),
        "MuteControl" => BlockHandle::MuteControl(MuteControl::create(ctx, helper).await?),
        "AudioOutput" => BlockHandle::AudioOutput(AudioOutput::create(ctx, helper).await?),
        "NoiseGenerator" => {
            BlockHandle::NoiseGenerator(NoiseGenerator::create(ctx, helper).await?)
        }
        "Ducker" => BlockHandle::Ducker(Ducker::create(ctx, helper).await?),
        "SourceSelector" => {
            BlockHandle::SourceSelector(SourceSelector::create(ctx, helper).await?)
        }
        _ => return Ok(None),
    };
    Ok(Some(handle))
}
