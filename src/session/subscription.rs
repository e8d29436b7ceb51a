//! Subscription registry and push router.
//!
//! The device identifies every push stream by an opaque publish token. The
//! client derives the token from block id, subscription type, and optional
//! channel, sends it in the subscribe command, and keys the registry by
//! whatever token ends up live (a device may rewrite it in the ack).
//!
//! Routing runs inside the receive loop. Block callbacks must only update
//! in-block state: submitting a command from inside a callback would wait
//! on a reply that only the receive loop itself can deliver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};
use ttp_protocol::{Publish, Value, subscribe_command};

use crate::session::command::{CommandError, CommandQueue};

// ---------------------------------------------------------------------------
// Subscriber surface
// ---------------------------------------------------------------------------

/// One routed subscription push, with the registry's record metadata
/// (subscription type, registered channel) merged in.
#[derive(Debug, Clone)]
pub struct PublishUpdate {
    pub token: String,
    pub subscribe_type: String,
    /// Channel index: the wire `index=` field when present, else the
    /// channel the subscription was registered with.
    pub channel: Option<u32>,
    pub value: Value,
}

/// Receiving end of a subscription. Implementations must not block and must
/// not submit commands (see module docs).
pub trait SubscriptionSink: Send + Sync {
    fn subscription_callback(&self, update: &PublishUpdate);
}

/// One subscription a block wants: type plus optional channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeSpec {
    pub subscribe_type: String,
    pub channel: Option<u32>,
}

impl SubscribeSpec {
    pub fn all(subscribe_type: &str) -> Self {
        SubscribeSpec {
            subscribe_type: subscribe_type.to_owned(),
            channel: None,
        }
    }

    pub fn channel(subscribe_type: &str, channel: u32) -> Self {
        SubscribeSpec {
            subscribe_type: subscribe_type.to_owned(),
            channel: Some(channel),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct SubscriptionRecord {
    owner: Arc<dyn SubscriptionSink>,
    subscribe_type: String,
    channel: Option<u32>,
}

/// Token → subscriber map, shared between the receive loop (router) and
/// whoever registers (connect path and poller re-registration).
#[derive(Clone)]
pub struct SubscriptionRegistry {
    records: Arc<Mutex<HashMap<String, SubscriptionRecord>>>,
    queue: CommandQueue,
}

impl SubscriptionRegistry {
    pub(crate) fn new(queue: CommandQueue) -> Self {
        SubscriptionRegistry {
            records: Arc::new(Mutex::new(HashMap::new())),
            queue,
        }
    }

    /// Subscribe `owner` to one push stream of `block_id`.
    ///
    /// Idempotent: registering the same logical subscription again replaces
    /// the record, which is exactly what the periodic re-registration cycle
    /// relies on (the device tolerates redundant subscribe commands).
    ///
    /// A device `-ERR` is logged and swallowed — re-registration is routine
    /// and a transient refusal must not take the session down.
    pub(crate) async fn register(
        &self,
        owner: Arc<dyn SubscriptionSink>,
        block_id: &str,
        spec: &SubscribeSpec,
    ) -> Result<(), CommandError> {
        let derived = derive_token(block_id, spec);
        let command = subscribe_command(block_id, &spec.subscribe_type, spec.channel, &derived);
        let response = self.queue.submit(command).await?;

        if let Some(message) = response.error_message() {
            warn!(
                block_id,
                subscribe_type = %spec.subscribe_type,
                message,
                "device refused subscription"
            );
            return Ok(());
        }

        // The ack may carry the token the device will actually publish under.
        let token = response
            .value()
            .and_then(|v| v.get("publishToken"))
            .and_then(Value::as_str)
            .map_or(derived, str::to_owned);

        let record = SubscriptionRecord {
            owner,
            subscribe_type: spec.subscribe_type.clone(),
            channel: spec.channel,
        };
        self.records
            .lock()
            .expect("subscription registry lock")
            .insert(token, record);
        Ok(())
    }

    /// Route one push frame to its subscriber. Unknown tokens are logged
    /// and dropped.
    pub(crate) fn route(&self, publish: &Publish) {
        let record = self
            .records
            .lock()
            .expect("subscription registry lock")
            .get(&publish.token)
            .cloned();
        let Some(record) = record else {
            error!(token = %publish.token, "publish for unregistered token, dropped");
            return;
        };
        let update = PublishUpdate {
            token: publish.token.clone(),
            subscribe_type: record.subscribe_type.clone(),
            channel: publish.channel.or(record.channel),
            value: publish.value.clone(),
        };
        debug!(token = %update.token, subscribe_type = %update.subscribe_type, "publish routed");
        record.owner.subscription_callback(&update);
    }

    #[cfg(test)]
    pub(crate) fn install_for_test(
        &self,
        token: &str,
        owner: Arc<dyn SubscriptionSink>,
        spec: &SubscribeSpec,
    ) {
        self.records.lock().expect("subscription registry lock").insert(
            token.to_owned(),
            SubscriptionRecord {
                owner,
                subscribe_type: spec.subscribe_type.clone(),
                channel: spec.channel,
            },
        );
    }
}

fn derive_token(block_id: &str, spec: &SubscribeSpec) -> String {
    match spec.channel {
        Some(ch) => format!("{}.{}.{}", block_id, spec.subscribe_type, ch),
        None => format!("{}.{}", block_id, spec.subscribe_type),
    }
}
