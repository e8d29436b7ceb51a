//! Scripted TTP mock device for integration tests.
//!
//! `MockDevice` serves one end of an in-memory duplex stream and answers
//! newline-terminated commands from a reply table. Everything a test needs
//! to assert on the engine's wire behavior is here:
//!
//! - exact-command reply scripting (single line or a line burst)
//! - a capture log of every command received, in arrival order
//! - out-of-band line injection (subscription pushes, stray banners)
//! - per-command or global silence, for timeout paths
//!
//! The device answers `+OK` to anything unscripted, so tests only script
//! the commands they care about.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Reply scripting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Reply {
    /// Send these lines, in order.
    Lines(Vec<String>),
    /// Never answer this command.
    Silence,
}

// ---------------------------------------------------------------------------
// MockDevice
// ---------------------------------------------------------------------------

/// A scripted TTP peer. Clone freely; all clones share the same script
/// table and capture log.
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Inner>,
}

struct Inner {
    replies: Mutex<HashMap<String, Reply>>,
    default_reply: Mutex<Reply>,
    log: Mutex<Vec<String>>,
    inject_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        MockDevice {
            inner: Arc::new(Inner {
                replies: Mutex::new(HashMap::new()),
                default_reply: Mutex::new(Reply::Lines(vec!["+OK".to_owned()])),
                log: Mutex::new(Vec::new()),
                inject_tx: Mutex::new(None),
            }),
        }
    }

    /// Script a single reply line for an exact command string.
    pub fn respond(&self, command: &str, reply_line: &str) {
        self.inner.replies.lock().expect("mock lock").insert(
            command.to_owned(),
            Reply::Lines(vec![reply_line.to_owned()]),
        );
    }

    /// Script a burst of reply lines (e.g. an ack followed by an initial
    /// subscription push) for an exact command string.
    pub fn respond_lines(&self, command: &str, reply_lines: &[&str]) {
        self.inner.replies.lock().expect("mock lock").insert(
            command.to_owned(),
            Reply::Lines(reply_lines.iter().map(|s| (*s).to_owned()).collect()),
        );
    }

    /// Never answer this command (drives the submit timeout path).
    pub fn silence(&self, command: &str) {
        self.inner
            .replies
            .lock()
            .expect("mock lock")
            .insert(command.to_owned(), Reply::Silence);
    }

    /// Stop answering anything that is not explicitly scripted.
    pub fn silence_unscripted(&self) {
        *self.inner.default_reply.lock().expect("mock lock") = Reply::Silence;
    }

    /// Push a raw line to the client out of band (subscription pushes,
    /// banners, malformed noise). Only valid after `spawn`.
    pub fn inject(&self, line: &str) {
        let guard = self.inner.inject_tx.lock().expect("mock lock");
        let tx = guard.as_ref().expect("inject before spawn");
        tx.send(line.to_owned()).expect("mock serve task gone");
    }

    /// Drop the device side of the connection (simulates the peer closing
    /// the transport).
    pub fn disconnect(&self) {
        *self.inner.inject_tx.lock().expect("mock lock") = None;
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.inner.log.lock().expect("mock lock").clone()
    }

    /// How many received commands contain `needle`.
    pub fn command_count_containing(&self, needle: &str) -> usize {
        self.inner
            .log
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Start serving and hand back the client end of the stream.
    pub fn spawn(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        *self.inner.inject_tx.lock().expect("mock lock") = Some(inject_tx);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(serve(server, inner, inject_rx));
        client
    }
}

async fn serve(
    server: DuplexStream,
    inner: Arc<Inner>,
    mut inject_rx: mpsc::UnboundedReceiver<String>,
) {
    let (read_half, mut write_half) = tokio::io::split(server);
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            injected = inject_rx.recv() => {
                let Some(line) = injected else { break };
                if write_line(&mut write_half, &line).await.is_err() {
                    break;
                }
            }
            command = lines.next_line() => {
                let Ok(Some(command)) = command else { break };
                inner.log.lock().expect("mock lock").push(command.clone());
                let reply = inner
                    .replies
                    .lock()
                    .expect("mock lock")
                    .get(&command)
                    .cloned()
                    .unwrap_or_else(|| inner.default_reply.lock().expect("mock lock").clone());
                match reply {
                    Reply::Silence => {}
                    Reply::Lines(reply_lines) => {
                        for line in reply_lines {
                            if write_line(&mut write_half, &line).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
