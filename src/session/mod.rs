//! The session engine: command serialization, inbound routing, and the
//! subscription registry.

pub mod command;
pub(crate) mod rx;
pub mod subscription;

pub use command::{CommandError, CommandQueue, DEFAULT_REPLY_TIMEOUT};
pub use subscription::{PublishUpdate, SubscribeSpec, SubscriptionRegistry, SubscriptionSink};
