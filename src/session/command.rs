//! Synchronous command serialization.
//!
//! TTP has no request id: correlation on the shared line is purely
//! positional, so exactly one command may be outstanding at any instant.
//! Callers go through [`CommandQueue::submit`], which is synchronous from
//! their point of view; internally every request flows through a single
//! worker task that owns the transport write half and pairs each command
//! with the next non-publish line the receive loop hands over.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use ttp_protocol::TtpResponse;

/// Default wait for a device reply before a submit fails with `Timeout`.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the command path itself.
///
/// A device `-ERR` is NOT an error here — it comes back as a normal
/// [`TtpResponse`] for the caller to inspect.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No reply line arrived in time. The connection survives; the next
    /// command proceeds normally.
    #[error("command timed out waiting for a device reply")]
    Timeout,
    /// The transport dropped while the command was queued or in flight.
    #[error("transport disconnected")]
    Disconnected,
    /// The session exit flag was set before a reply arrived.
    #[error("session is shutting down")]
    Cancelled,
    /// The session façade is not ready for commands.
    #[error("session not ready")]
    NotReady,
}

// ---------------------------------------------------------------------------
// Queue handle
// ---------------------------------------------------------------------------

pub(crate) struct CommandRequest {
    pub command: String,
    pub reply: oneshot::Sender<Result<TtpResponse, CommandError>>,
}

/// Cloneable submission handle to the serializer worker.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandQueue {
    pub(crate) fn new(tx: mpsc::Sender<CommandRequest>) -> Self {
        CommandQueue { tx }
    }

    /// Send one command and wait for its reply.
    ///
    /// Commands from any number of tasks execute strictly in submission
    /// order, one at a time.
    pub async fn submit(&self, command: impl Into<String>) -> Result<TtpResponse, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CommandRequest {
                command: command.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| CommandError::Cancelled)?;
        reply_rx.await.map_err(|_| CommandError::Cancelled)?
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// The serializer worker. Sole writer on the transport.
///
/// `replies` carries every non-publish inbound line from the receive loop;
/// its channel closing means the transport is gone.
pub(crate) async fn run_command_worker<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut requests: mpsc::Receiver<CommandRequest>,
    mut replies: mpsc::Receiver<TtpResponse>,
    reply_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("command serializer worker started");
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // A reply that arrived after its command already timed out must not
        // correlate with this one.
        while replies.try_recv().is_ok() {}

        if let Err(e) = write_command(&mut writer, &request.command).await {
            warn!(command = %request.command, error = %e, "transport write failed");
            let _ = request.reply.send(Err(CommandError::Disconnected));
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = shutdown.changed() => Err(CommandError::Cancelled),
            reply = tokio::time::timeout(reply_timeout, replies.recv()) => match reply {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(CommandError::Disconnected),
                Err(_) => {
                    warn!(command = %request.command, "command timed out");
                    Err(CommandError::Timeout)
                }
            },
        };
        let cancelled = matches!(outcome, Err(CommandError::Cancelled));
        let _ = request.reply.send(outcome);
        if cancelled && *shutdown.borrow() {
            break;
        }
    }

    // Exit: fail everything still queued rather than leaving callers hanging.
    requests.close();
    while let Ok(request) = requests.try_recv() {
        let _ = request.reply.send(Err(CommandError::Cancelled));
    }
    debug!("command serializer worker terminated");
}

async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &str) -> std::io::Result<()> {
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
