//! Periodic device refresh.
//!
//! Faults and network status have no subscription stream, so the poller
//! queries them on a fixed interval. Each cycle also re-registers every
//! block's base subscriptions: the device silently drops subscriptions
//! across configuration changes and reconnects, and it tolerates redundant
//! subscribe commands, so blanket re-registration keeps push streams alive
//! without tracking connection state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};
use ttp_protocol::Value;

use crate::block::BlockHandle;
use crate::session::command::CommandQueue;
use crate::session::subscription::SubscriptionRegistry;

/// Device attributes maintained by the poller.
#[derive(Debug, Default, Clone)]
pub struct DeviceStatus {
    /// First element of `activeFaultList` — the current fault set.
    pub faults: Option<Value>,
    /// Decoded `networkStatus` record.
    pub network: Option<Value>,
}

pub(crate) async fn run_poller(
    queue: CommandQueue,
    registry: SubscriptionRegistry,
    blocks: Arc<HashMap<String, BlockHandle>>,
    status: Arc<Mutex<DeviceStatus>>,
    refresh_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("device refresh loop started");
    let mut ticker = tokio::time::interval(refresh_interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                refresh_once(&queue, &registry, &blocks, &status).await;
            }
        }
    }
    debug!("device refresh loop terminated");
}

async fn refresh_once(
    queue: &CommandQueue,
    registry: &SubscriptionRegistry,
    blocks: &HashMap<String, BlockHandle>,
    status: &Mutex<DeviceStatus>,
) {
    match queue.submit("DEVICE get activeFaultList").await {
        Ok(response) => {
            let faults = response
                .value()
                .and_then(|v| v.as_list())
                .and_then(|items| items.first())
                .cloned();
            status.lock().expect("device status lock").faults = faults;
        }
        Err(e) => warn!(error = %e, "active fault query failed"),
    }

    match queue.submit("DEVICE get networkStatus").await {
        Ok(response) => {
            status.lock().expect("device status lock").network = response.value().cloned();
        }
        Err(e) => warn!(error = %e, "network status query failed"),
    }

    // Re-validate every subscription so push streams survive configuration
    // changes and transport reconnects.
    for handle in blocks.values() {
        for spec in handle.base_subscriptions() {
            if let Err(e) = registry
                .register(handle.as_sink(), handle.block_id(), &spec)
                .await
            {
                warn!(
                    block_id = handle.block_id(),
                    subscribe_type = %spec.subscribe_type,
                    error = %e,
                    "subscription re-registration failed"
                );
            }
        }
    }
}
