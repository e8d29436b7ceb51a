//! tesira — client library for TTP-controlled audio DSP devices.
//!
//! Connect over any established byte stream (TCP, an SSH channel adapter,
//! or an in-memory pair in tests), and the session discovers the device's
//! block catalog, builds typed block objects, keeps their state live
//! through subscriptions and polling, and serializes every command onto
//! the single shared protocol line.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use tesira::{Dsp, DspConfig};
//!
//! let stream = tokio::net::TcpStream::connect("10.0.0.5:23").await?;
//! let mut dsp = Dsp::new(DspConfig::default());
//! dsp.connect(stream, &[]).await?;
//!
//! if let Some(level) = dsp.block("Level1").and_then(|b| b.as_level_control()) {
//!     level.set_level(-6.0, 1).await?;
//! }
//!
//! dsp.save_block_map("site.bmap".as_ref())?;
//! dsp.close().await;
//! # Ok(())
//! # }
//! ```

pub mod block;
mod block_map;
pub mod config;
mod discovery;
pub mod dsp;
mod poller;
pub mod session;

pub use block::{
    AudioOutput, BlockError, BlockHandle, BlockOps, Channel, ChannelAttribute, ChannelMap,
    DanteInput, Ducker, InitHelper, LevelControl, MuteControl, NoiseGenerator, Source,
    SourceSelector,
};
pub use block_map::{BlockEntry, BlockMapError};
pub use config::{ConfigError, DspConfig};
pub use dsp::{ConnectError, DeviceInfo, Dsp};
pub use poller::DeviceStatus;
pub use session::{CommandError, CommandQueue, PublishUpdate, SubscribeSpec, SubscriptionSink};

// Re-export the wire types callers see in responses.
pub use ttp_protocol::{Publish, ResponseKind, TtpResponse, Value};
