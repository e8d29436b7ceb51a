//! Inbound receive loop.
//!
//! Sole reader on the transport. Every line is classified by the protocol
//! parser: subscription pushes route straight to the owning block through
//! the registry, command replies (`+OK` / `-ERR`) go to the serializer
//! worker, and anything else is protocol noise and dropped.
//!
//! On EOF or a read error the loop clears the connected flag and returns;
//! dropping its reply sender is what fails any in-flight submit with
//! `Disconnected`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use ttp_protocol::{ResponseKind, TtpResponse, parse_line};

use crate::session::subscription::SubscriptionRegistry;

pub(crate) async fn run_rx_loop<R: AsyncRead + Unpin>(
    reader: R,
    registry: SubscriptionRegistry,
    reply_tx: mpsc::Sender<TtpResponse>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("receive loop started");
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => handle_line(&line, &registry, &reply_tx),
            Ok(None) => {
                warn!("transport closed by peer");
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                warn!(error = %e, "transport read failed");
                connected.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    debug!("receive loop terminated");
}

fn handle_line(line: &str, registry: &SubscriptionRegistry, reply_tx: &mpsc::Sender<TtpResponse>) {
    let Some(response) = parse_line(line) else {
        // Malformed publishes are worth a warning; banners and prompts are not.
        if line.trim_start().starts_with('!') {
            warn!(line, "publish line without a usable token, dropped");
        }
        return;
    };
    match &response.kind {
        ResponseKind::Publish(publish) => registry.route(publish),
        ResponseKind::Ok(_) | ResponseKind::Error(_) => {
            // try_send: a reply nobody is waiting for (late after a timeout
            // overflow) must never stall publish routing.
            if let Err(e) = reply_tx.try_send(response) {
                warn!(error = %e, "unsolicited command reply dropped");
            }
        }
    }
}
