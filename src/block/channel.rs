//! Per-channel state.
//!
//! Channels are indexed from 1; index 0 is the protocol-level wildcard
//! meaning "all channels" and never appears as a map key. An attribute is
//! present (`Some`) only when the owning block's type supports it.
//!
//! Only the immutable topology (index, label, level range) serializes into
//! the attribute helper; status fields are always re-learned fresh, via
//! subscription or status query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<f64>,

    // Status attributes, never persisted.
    #[serde(skip)]
    pub muted: Option<bool>,
    #[serde(skip)]
    pub level: Option<f64>,
    #[serde(skip)]
    pub inverted: Option<bool>,
    #[serde(skip)]
    pub fault_on_inactive: Option<bool>,
}

impl Channel {
    pub fn new(index: u32) -> Self {
        Channel {
            index,
            label: None,
            min_level: None,
            max_level: None,
            muted: None,
            level: None,
            inverted: None,
            fault_on_inactive: None,
        }
    }
}

/// Channel map keyed by 1-based index.
pub type ChannelMap = BTreeMap<u32, Channel>;

/// The settable per-channel attributes, tagged for the shared set path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAttribute {
    Mute,
    Level,
    Invert,
    FaultOnInactive,
}

impl ChannelAttribute {
    pub(crate) fn wire_name(self) -> &'static str {
        match self {
            ChannelAttribute::Mute => "mute",
            ChannelAttribute::Level => "level",
            ChannelAttribute::Invert => "invert",
            ChannelAttribute::FaultOnInactive => "faultOnInactive",
        }
    }
}
