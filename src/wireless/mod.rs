//! Wireless node registry and discovery engine.
//!
//! Tracks known peers, routes node operations to the transport each node
//! declared, and runs bounded-time discovery scans on a dedicated worker.
//!
//! ```text
//!  WirelessProtocol ("ble", "espnow", ...)
//!        │ scan()                        ▲ send_command / request_data /
//!        ▼                               │ subscribe / configure
//!  ┌───────────────┐   absorb   ┌──────────────────┐
//!  │ discovery.rs  │──────────▶│ nodes (BTreeMap)  │
//!  │ (one worker)  │           └──────────────────┘
//!  └───────┬───────┘                    │ status / data
//!          ▼ discovery callback         ▼ callbacks
//! ```
//!
//! Nodes and protocols sit behind separate locks so a scan in progress
//! never blocks protocol registration. Callbacks run with no lock held.

mod discovery;

use core::fmt;
use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::time::epoch_millis;
use crate::app::ports::WirelessProtocol;
use crate::config::FleetConfig;
use crate::drivers::worker::{Worker, WorkerSpec, lock};
use crate::error::WirelessError;

/// Discovery filter that queries every registered protocol.
pub const ALL_PROTOCOLS: &str = "all";

// ── Node model ────────────────────────────────────────────────

/// Connection state of a wireless peer.
///
/// Changes only through [`WirelessNodeManager::update_node_status`]; nothing
/// times a node out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl NodeStatus {
    pub const ALL: [Self; 5] = [
        Self::Unknown,
        Self::Connecting,
        Self::Connected,
        Self::Disconnected,
        Self::Error,
    ];

    /// Whether `self → next` is an allowed change. Staying put is not a
    /// transition and is handled by the caller.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Error)
                | (Self::Unknown, Self::Connecting | Self::Connected | Self::Disconnected)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
                | (Self::Disconnected, Self::Connecting | Self::Connected)
                | (Self::Error, Self::Connecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wireless peer as the registry knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub name: String,
    pub node_type: String,
    /// Name of the registered protocol that reaches this node.
    pub protocol: String,
    pub mac_address: String,
    pub status: NodeStatus,
    pub capabilities: Value,
    pub configuration: Value,
    /// Epoch milliseconds of the last status, RSSI, data or scan sighting.
    pub last_seen_ms: u64,
    pub rssi: i16,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, protocol: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            name: node_id.clone(),
            node_id,
            node_type: String::new(),
            protocol: protocol.into(),
            mac_address: String::new(),
            status: NodeStatus::Unknown,
            capabilities: Value::Null,
            configuration: Value::Null,
            last_seen_ms: 0,
            rssi: 0,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = mac.into();
        self
    }

    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatusChange {
    pub node_id: String,
    pub previous: NodeStatus,
    pub current: NodeStatus,
}

/// Data pushed by a node outside any request.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub node_id: String,
    pub topic: Option<String>,
    pub payload: Value,
}

pub type DiscoveryCallback = Arc<dyn Fn(&NodeInfo) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(&NodeStatusChange) + Send + Sync>;
pub type DataCallback = Arc<dyn Fn(&NodeData) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    discovery: Option<DiscoveryCallback>,
    status: Option<StatusCallback>,
    data: Option<DataCallback>,
}

// ── Manager ───────────────────────────────────────────────────

struct Inner {
    nodes: Mutex<BTreeMap<String, NodeInfo>>,
    /// Registration order is the discovery query order.
    protocols: Mutex<Vec<(String, Arc<dyn WirelessProtocol>)>>,
    callbacks: Mutex<Callbacks>,
    discovery: Mutex<Option<Worker>>,
    running: AtomicBool,
    poll_interval: Duration,
    stack_kb: usize,
}

/// Shared handle to the node registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct WirelessNodeManager {
    inner: Arc<Inner>,
}

impl WirelessNodeManager {
    pub fn new(config: &FleetConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(BTreeMap::new()),
                protocols: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Callbacks::default()),
                discovery: Mutex::new(None),
                running: AtomicBool::new(false),
                poll_interval: config.discovery_poll_interval(),
                stack_kb: config.worker_stack_kb as usize,
            }),
        }
    }

    // ── Nodes ─────────────────────────────────────────────────

    /// Add a node. It always starts in [`NodeStatus::Unknown`].
    pub fn register_node(&self, mut info: NodeInfo) -> Result<(), WirelessError> {
        let mut nodes = lock(&self.inner.nodes);
        if nodes.contains_key(&info.node_id) {
            return Err(WirelessError::DuplicateId(info.node_id));
        }
        info.status = NodeStatus::Unknown;
        info.last_seen_ms = epoch_millis();
        info!(
            "Wireless: registered node '{}' (protocol={})",
            info.node_id, info.protocol
        );
        nodes.insert(info.node_id.clone(), info);
        Ok(())
    }

    pub fn unregister_node(&self, node_id: &str) -> Result<(), WirelessError> {
        lock(&self.inner.nodes)
            .remove(node_id)
            .map(|_| info!("Wireless: unregistered node '{}'", node_id))
            .ok_or_else(|| WirelessError::NotFound(node_id.into()))
    }

    /// Move a node to `status`, notifying the status callback on change.
    pub fn update_node_status(
        &self,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<(), WirelessError> {
        let change = {
            let mut nodes = lock(&self.inner.nodes);
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| WirelessError::NotFound(node_id.into()))?;
            let previous = node.status;
            if previous != status && !previous.can_transition_to(status) {
                return Err(WirelessError::InvalidTransition {
                    node_id: node_id.into(),
                    from: previous,
                    to: status,
                });
            }
            node.last_seen_ms = epoch_millis();
            if previous == status {
                return Ok(());
            }
            node.status = status;
            NodeStatusChange {
                node_id: node_id.into(),
                previous,
                current: status,
            }
        };

        info!("Wireless: node '{}' {} -> {}", node_id, change.previous, change.current);
        let cb = lock(&self.inner.callbacks).status.clone();
        if let Some(cb) = cb {
            cb(&change);
        }
        Ok(())
    }

    pub fn update_node_rssi(&self, node_id: &str, rssi: i16) -> Result<(), WirelessError> {
        let mut nodes = lock(&self.inner.nodes);
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| WirelessError::NotFound(node_id.into()))?;
        node.rssi = rssi;
        node.last_seen_ms = epoch_millis();
        Ok(())
    }

    pub fn node_info(&self, node_id: &str) -> Option<NodeInfo> {
        lock(&self.inner.nodes).get(node_id).cloned()
    }

    pub fn is_node_registered(&self, node_id: &str) -> bool {
        lock(&self.inner.nodes).contains_key(node_id)
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        lock(&self.inner.nodes).values().cloned().collect()
    }

    // ── Protocols ─────────────────────────────────────────────

    pub fn register_protocol(
        &self,
        name: &str,
        protocol: Arc<dyn WirelessProtocol>,
    ) -> Result<(), WirelessError> {
        let mut protocols = lock(&self.inner.protocols);
        if protocols.iter().any(|(n, _)| n == name) {
            return Err(WirelessError::DuplicateName(name.into()));
        }
        protocols.push((name.into(), protocol));
        info!("Wireless: registered protocol '{}'", name);
        Ok(())
    }

    /// Remove a protocol. A scan in progress stops querying it on its next poll.
    pub fn unregister_protocol(&self, name: &str) -> Result<(), WirelessError> {
        let mut protocols = lock(&self.inner.protocols);
        let idx = protocols
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| WirelessError::ProtocolNotFound(name.into()))?;
        protocols.remove(idx);
        info!("Wireless: unregistered protocol '{}'", name);
        Ok(())
    }

    pub fn registered_protocols(&self) -> Vec<String> {
        lock(&self.inner.protocols)
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn is_protocol_registered(&self, name: &str) -> bool {
        lock(&self.inner.protocols).iter().any(|(n, _)| n == name)
    }

    fn protocol(&self, name: &str) -> Option<Arc<dyn WirelessProtocol>> {
        lock(&self.inner.protocols)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| Arc::clone(p))
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Start a bounded scan over `filter` (a protocol name or [`ALL_PROTOCOLS`]).
    ///
    /// Every peer found is passed to the discovery callback once per scan.
    /// A filter naming no registered protocol scans nothing and simply
    /// times out.
    pub fn start_discovery(&self, filter: &str, timeout: Duration) -> Result<(), WirelessError> {
        let mut slot = lock(&self.inner.discovery);
        if self.inner.running.load(Ordering::Acquire) {
            return Err(WirelessError::AlreadyRunning);
        }
        // Reap the previous, already finished, scan.
        if let Some(done) = slot.take() {
            done.stop();
        }
        if filter != ALL_PROTOCOLS && !self.is_protocol_registered(filter) {
            warn!("Discovery: protocol '{}' not registered, scan will be empty", filter);
        }

        self.inner.running.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let filter = filter.to_string();
        let spec = WorkerSpec::new("discovery\0", self.inner.stack_kb);
        match Worker::spawn(spec, move |token| discovery::run(&inner, &filter, timeout, &token)) {
            Ok(worker) => {
                *slot = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                Err(WirelessError::TaskSpawn(e.to_string()))
            }
        }
    }

    /// Cancel the scan and wait for its worker to exit.
    ///
    /// The worker slot stays locked across the join, so a concurrent
    /// `start_discovery` cannot spawn a second scan while this one winds
    /// down. The running flag is cleared by the worker itself on exit.
    pub fn stop_discovery(&self) {
        let mut slot = lock(&self.inner.discovery);
        if let Some(worker) = slot.take() {
            worker.stop();
        }
    }

    pub fn is_discovery_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ── Node operations ───────────────────────────────────────

    fn route(&self, node_id: &str) -> Result<(NodeInfo, Arc<dyn WirelessProtocol>), WirelessError> {
        let node = self
            .node_info(node_id)
            .ok_or_else(|| WirelessError::NotFound(node_id.into()))?;
        let protocol = self
            .protocol(&node.protocol)
            .ok_or_else(|| WirelessError::ProtocolUnavailable {
                node_id: node_id.into(),
                protocol: node.protocol.clone(),
            })?;
        Ok((node, protocol))
    }

    pub fn send_command(&self, node_id: &str, payload: &Value) -> Result<(), WirelessError> {
        let (node, protocol) = self.route(node_id)?;
        protocol.send_command(&node, payload)?;
        Ok(())
    }

    pub fn request_data(&self, node_id: &str, request: &Value) -> Result<Value, WirelessError> {
        let (node, protocol) = self.route(node_id)?;
        Ok(protocol.request_data(&node, request)?)
    }

    pub fn subscribe_to_data(&self, node_id: &str, topic: &str) -> Result<(), WirelessError> {
        let (node, protocol) = self.route(node_id)?;
        protocol.subscribe(&node, topic)?;
        Ok(())
    }

    pub fn unsubscribe_from_data(&self, node_id: &str, topic: &str) -> Result<(), WirelessError> {
        let (node, protocol) = self.route(node_id)?;
        protocol.unsubscribe(&node, topic)?;
        Ok(())
    }

    /// Push `config` to the node and remember it once the transport accepts it.
    pub fn configure_node(&self, node_id: &str, config: Value) -> Result<(), WirelessError> {
        let (node, protocol) = self.route(node_id)?;
        protocol.configure(&node, &config)?;
        if let Some(node) = lock(&self.inner.nodes).get_mut(node_id) {
            node.configuration = config;
        }
        Ok(())
    }

    /// Inbound data pushed by a transport for a registered node.
    pub fn handle_node_data(
        &self,
        node_id: &str,
        topic: Option<&str>,
        payload: Value,
    ) -> Result<(), WirelessError> {
        {
            let mut nodes = lock(&self.inner.nodes);
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| WirelessError::NotFound(node_id.into()))?;
            node.last_seen_ms = epoch_millis();
        }
        let data = NodeData {
            node_id: node_id.into(),
            topic: topic.map(str::to_string),
            payload,
        };
        let cb = lock(&self.inner.callbacks).data.clone();
        if let Some(cb) = cb {
            cb(&data);
        }
        Ok(())
    }

    // ── Callbacks ─────────────────────────────────────────────

    /// Runs on the discovery worker. It must not call `stop_discovery`
    /// while another thread may be stopping the same scan.
    pub fn set_discovery_callback(&self, cb: impl Fn(&NodeInfo) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).discovery = Some(Arc::new(cb));
    }

    pub fn set_status_callback(&self, cb: impl Fn(&NodeStatusChange) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).status = Some(Arc::new(cb));
    }

    pub fn set_data_callback(&self, cb: impl Fn(&NodeData) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).data = Some(Arc::new(cb));
    }
}
