//! Session façade.
//!
//! `Dsp` composes the whole stack: it splits the caller-supplied transport
//! stream, starts the receive loop and the command serializer, runs the
//! session baseline, resolves the block map (cache or discovery), builds
//! and subscribes the block objects, and keeps device status fresh through
//! the poller. One `Dsp` is one device session.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ttp_protocol::{TtpResponse, Value, get_command};

use crate::block::{self, BlockCtx, BlockHandle};
use crate::block_map::{self, BlockEntry, BlockMapError};
use crate::config::DspConfig;
use crate::discovery;
use crate::poller::{self, DeviceStatus};
use crate::session::command::{
    CommandError, CommandQueue, CommandRequest, DEFAULT_REPLY_TIMEOUT, run_command_worker,
};
use crate::session::rx::run_rx_loop;
use crate::session::subscription::SubscriptionRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures that abort `connect`. A single bad block never lands here —
/// it is logged and omitted from the catalog instead.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("session baseline command failed: {0}")]
    Baseline(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unexpected device reply for '{attribute}': {detail}")]
    MalformedReply { attribute: String, detail: String },
}

// ---------------------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------------------

/// Static device facts captured during connect.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub hostname: String,
    pub software_version: String,
    pub serial_number: String,
    pub aliases: Vec<String>,
    pub discovered_servers: Option<Value>,
}

// ---------------------------------------------------------------------------
// Dsp
// ---------------------------------------------------------------------------

pub struct Dsp {
    config: DspConfig,
    library_version: String,
    ready: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    queue: Option<CommandQueue>,
    blocks: Arc<HashMap<String, BlockHandle>>,
    block_map: BTreeMap<String, BlockEntry>,
    info: Option<DeviceInfo>,
    status: Arc<Mutex<DeviceStatus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Dsp {
    fn default() -> Self {
        Dsp::new(DspConfig::default())
    }
}

impl Dsp {
    pub fn new(config: DspConfig) -> Self {
        Dsp {
            config,
            library_version: env!("CARGO_PKG_VERSION").to_owned(),
            ready: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            queue: None,
            blocks: Arc::new(HashMap::new()),
            block_map: BTreeMap::new(),
            info: None,
            status: Arc::new(Mutex::new(DeviceStatus::default())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connect over an established transport stream (TCP, an SSH channel
    /// adapter, or an in-memory pair in tests).
    ///
    /// `skip_block_types` extends the configured skip list for this
    /// session.
    pub async fn connect<S>(&mut self, stream: S, skip_block_types: &[&str]) -> Result<(), ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.connected.load(Ordering::SeqCst) {
            return Err(ConnectError::AlreadyConnected);
        }
        let startup = Instant::now();

        let (reader, writer) = tokio::io::split(stream);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (request_tx, request_rx) = mpsc::channel::<CommandRequest>(64);
        let (reply_tx, reply_rx) = mpsc::channel(8);

        let queue = CommandQueue::new(request_tx);
        let registry = SubscriptionRegistry::new(queue.clone());
        self.connected.store(true, Ordering::SeqCst);

        {
            let mut tasks = self.tasks.lock().expect("task list lock");
            tasks.push(tokio::spawn(run_rx_loop(
                reader,
                registry.clone(),
                reply_tx,
                Arc::clone(&self.connected),
                shutdown_rx.clone(),
            )));
            tasks.push(tokio::spawn(run_command_worker(
                writer,
                request_rx,
                reply_rx,
                DEFAULT_REPLY_TIMEOUT,
                shutdown_rx.clone(),
            )));
        }
        *self.shutdown.lock().expect("shutdown lock") = Some(shutdown_tx);
        self.queue = Some(queue.clone());

        // Session baseline: full responses, no field echo.
        for command in ["SESSION set verbose true", "SESSION set detailedResponse false"] {
            let response = queue.submit(command).await?;
            if let Some(message) = response.error_message() {
                return Err(ConnectError::Baseline(format!("{}: {}", command, message)));
            }
        }

        // Device identity and statistics.
        let hostname = device_string(&queue, "hostname").await?;
        let software_version = device_string(&queue, "version").await?;
        let serial_number = device_string(&queue, "serialNumber").await?;
        let aliases = session_aliases(&queue).await?;
        info!(
            %hostname,
            %serial_number,
            %software_version,
            aliases = aliases.len(),
            "connected to device"
        );
        let discovered_servers = queue
            .submit(get_command("DEVICE", "discoveredServers", None))
            .await?
            .value()
            .cloned();

        // Block map: cache when it matches the live device, discovery
        // otherwise.
        let mut map = match self.config.block_map_file.as_deref() {
            Some(path) => {
                match block_map::load_block_map(path, &hostname, &aliases, &self.library_version) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "could not load block map");
                        discovery::discover_blocks(&queue, &aliases).await?
                    }
                }
            }
            None => discovery::discover_blocks(&queue, &aliases).await?,
        };

        // Instantiate and subscribe blocks. Failures here cost one block,
        // never the session.
        let skip: HashSet<&str> = self
            .config
            .skip_block_types
            .iter()
            .map(String::as_str)
            .chain(skip_block_types.iter().copied())
            .collect();
        info!("initializing blocks");
        let mut blocks = HashMap::new();
        for (block_id, entry) in map.clone() {
            if skip.contains(entry.block_type.as_str()) {
                info!(%block_id, block_type = %entry.block_type, "block load skipped by preference");
                continue;
            }
            let Some(type_version) = block::type_version(&entry.block_type) else {
                debug!(%block_id, block_type = %entry.block_type, "unsupported block type");
                continue;
            };
            let helper = entry
                .attributes
                .as_ref()
                .and_then(|h| h.usable_for(type_version));
            if entry.attributes.is_some() && helper.is_none() {
                debug!(%block_id, "attribute helper rejected, block will self-query");
            }

            let ctx = BlockCtx {
                block_id: block_id.clone(),
                queue: queue.clone(),
                connected: Arc::clone(&self.connected),
            };
            match block::instantiate(&entry.block_type, ctx, helper).await {
                Ok(Some(handle)) => {
                    // The freshly exported helper keeps the in-memory map
                    // ready to persist.
                    if let Some(live) = map.get_mut(&block_id) {
                        live.attributes = Some(handle.export_init_helper());
                    }
                    for spec in handle.base_subscriptions() {
                        if let Err(e) = registry
                            .register(handle.as_sink(), handle.block_id(), &spec)
                            .await
                        {
                            warn!(
                                %block_id,
                                subscribe_type = %spec.subscribe_type,
                                error = %e,
                                "subscription registration failed"
                            );
                        }
                    }
                    blocks.insert(block_id, handle);
                }
                Ok(None) => {
                    debug!(%block_id, block_type = %entry.block_type, "unsupported block type");
                }
                Err(e) => {
                    warn!(%block_id, error = %e, "block initialization failed, omitted");
                }
            }
        }
        self.block_map = map;
        self.blocks = Arc::new(blocks);

        self.tasks.lock().expect("task list lock").push(tokio::spawn(poller::run_poller(
            queue,
            registry,
            Arc::clone(&self.blocks),
            Arc::clone(&self.status),
            Duration::from_secs(self.config.device_refresh_interval.max(1)),
            shutdown_rx,
        )));

        self.info = Some(DeviceInfo {
            hostname,
            software_version,
            serial_number,
            aliases,
            discovered_servers,
        });
        self.ready.store(true, Ordering::SeqCst);
        info!(
            blocks = self.blocks.len(),
            elapsed_ms = startup.elapsed().as_millis() as u64,
            "session ready"
        );
        Ok(())
    }

    /// Terminate the session: signal every worker and wait for all of them
    /// to return.
    pub async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.lock().expect("shutdown lock").take() {
            let _ = shutdown.send(true);
        }
        let tasks: Vec<JoinHandle<()>> =
            self.tasks.lock().expect("task list lock").drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Send a raw command to the device.
    pub async fn device_command(&self, command: &str) -> Result<TtpResponse, CommandError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(CommandError::NotReady);
        }
        let queue = self.queue.as_ref().ok_or(CommandError::NotReady)?;
        queue.submit(command).await
    }

    pub async fn start_system_audio(&self) -> Result<TtpResponse, CommandError> {
        self.device_command("DEVICE startAudio").await
    }

    pub async fn stop_system_audio(&self) -> Result<TtpResponse, CommandError> {
        self.device_command("DEVICE stopAudio").await
    }

    pub async fn reboot(&self) -> Result<TtpResponse, CommandError> {
        self.device_command("DEVICE reboot").await
    }

    /// Persist the active block map. The file name is forced to end in
    /// `.bmap`; the final path is returned.
    pub fn save_block_map(&self, output: &Path) -> Result<PathBuf, BlockMapError> {
        let info = self.info.as_ref().ok_or(BlockMapError::NoActiveMap)?;
        block_map::save_block_map(
            output,
            &info.hostname,
            &info.aliases,
            &self.block_map,
            &self.library_version,
        )
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.hostname.as_str())
    }

    pub fn software_version(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.software_version.as_str())
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.serial_number.as_str())
    }

    pub fn aliases(&self) -> &[String] {
        self.info.as_ref().map_or(&[], |i| i.aliases.as_slice())
    }

    pub fn discovered_servers(&self) -> Option<Value> {
        self.info.as_ref()?.discovered_servers.clone()
    }

    /// Current fault set, as last polled.
    pub fn faults(&self) -> Option<Value> {
        self.status.lock().expect("device status lock").faults.clone()
    }

    /// Network status, as last polled.
    pub fn network_status(&self) -> Option<Value> {
        self.status.lock().expect("device status lock").network.clone()
    }

    /// The live block catalog, keyed by block id.
    pub fn blocks(&self) -> &HashMap<String, BlockHandle> {
        &self.blocks
    }

    pub fn block(&self, block_id: &str) -> Option<&BlockHandle> {
        self.blocks.get(block_id)
    }
}

// ---------------------------------------------------------------------------
// Device info queries
// ---------------------------------------------------------------------------

async fn device_string(queue: &CommandQueue, attribute: &str) -> Result<String, ConnectError> {
    let response = queue.submit(get_command("DEVICE", attribute, None)).await?;
    match response.value() {
        Some(Value::Str(s)) => Ok(s.trim().to_owned()),
        Some(other) => Ok(other.to_string()),
        None => Err(ConnectError::MalformedReply {
            attribute: attribute.to_owned(),
            detail: response
                .error_message()
                .unwrap_or("no value in reply")
                .to_owned(),
        }),
    }
}

async fn session_aliases(queue: &CommandQueue) -> Result<Vec<String>, ConnectError> {
    let response = queue.submit("SESSION get aliases").await?;
    let value = response.value().cloned().unwrap_or(Value::Null);
    let Some(items) = value.as_list() else {
        return Err(ConnectError::MalformedReply {
            attribute: "aliases".to_owned(),
            detail: format!("expected alias list, got {:?}", value),
        });
    };
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect())
}
