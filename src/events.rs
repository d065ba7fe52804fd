//! Per-kind event queues between the fleet workers and the application.
//!
//! Registry and wireless callbacks run on worker threads. Instead of doing
//! application work there, each callback only copies its payload into a
//! bounded `embassy-sync` channel; the application drains the channels on
//! its own thread and hands the events to an [`EventSink`].
//!
//! ```text
//! ┌──────────────┐ reading/fault ┌──────────────┐            ┌────────────┐
//! │ sensor-poll  │──────────────▶│              │  dispatch  │            │
//! │ discovery    │──────────────▶│ FleetQueues  │───────────▶│ EventSink  │
//! │ status/data  │──────────────▶│ (bounded)    │            │ (consumer) │
//! │ config store │──────────────▶│              │            │            │
//! └──────────────┘               └──────────────┘            └────────────┘
//! ```
//!
//! A full queue drops the new event and counts it; producers never block.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::app::config_store::{ConfigChange, SensorConfigStore};
use crate::app::ports::EventSink;
use crate::registry::{SensorFault, SensorRegistry};
use crate::types::SensorReading;
use crate::wireless::{NodeData, NodeInfo, NodeStatusChange, WirelessNodeManager};

/// Default queue depth.
pub const DEFAULT_DEPTH: usize = 32;

/// Bounded multi-producer queue with drop counting.
pub struct EventQueue<T, const N: usize = DEFAULT_DEPTH> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
    dropped: AtomicU32,
}

impl<T, const N: usize> EventQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` if the queue was full.
    pub fn push(&self, event: T) -> bool {
        if self.channel.try_send(event).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Pop everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        core::iter::from_fn(|| self.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Events lost to a full queue since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T, const N: usize> Default for EventQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback that copies each event into `queue`.
pub fn forward<T, const N: usize>(
    queue: Arc<EventQueue<T, N>>,
) -> impl Fn(&T) + Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    move |event: &T| {
        queue.push(event.clone());
    }
}

/// One queue per fleet event kind.
pub struct FleetQueues {
    pub readings: Arc<EventQueue<SensorReading, 64>>,
    pub faults: Arc<EventQueue<SensorFault, 16>>,
    pub discovered: Arc<EventQueue<NodeInfo, 16>>,
    pub node_status: Arc<EventQueue<NodeStatusChange>>,
    pub node_data: Arc<EventQueue<NodeData>>,
    pub config: Arc<EventQueue<ConfigChange, 8>>,
}

impl FleetQueues {
    pub fn new() -> Self {
        Self {
            readings: Arc::new(EventQueue::new()),
            faults: Arc::new(EventQueue::new()),
            discovered: Arc::new(EventQueue::new()),
            node_status: Arc::new(EventQueue::new()),
            node_data: Arc::new(EventQueue::new()),
            config: Arc::new(EventQueue::new()),
        }
    }

    /// Point every callback of the three producers at these queues.
    ///
    /// Readings are wired separately because the registry takes its
    /// reading callback in `start_reading`; pass [`Self::reading_callback`].
    pub fn install(
        &self,
        registry: &SensorRegistry,
        manager: &WirelessNodeManager,
        config_store: &SensorConfigStore,
    ) {
        registry.set_error_callback(forward(Arc::clone(&self.faults)));
        manager.set_discovery_callback(forward(Arc::clone(&self.discovered)));
        manager.set_status_callback(forward(Arc::clone(&self.node_status)));
        manager.set_data_callback(forward(Arc::clone(&self.node_data)));
        config_store.set_change_callback(forward(Arc::clone(&self.config)));
    }

    pub fn reading_callback(&self) -> impl Fn(&SensorReading) + Send + Sync + 'static {
        forward(Arc::clone(&self.readings))
    }

    /// Drain every queue into `sink`. Returns the number of events delivered.
    pub fn dispatch(&self, sink: &mut dyn EventSink) -> usize {
        let mut delivered = 0;
        for change in self.config.drain() {
            sink.on_config_changed(&change);
            delivered += 1;
        }
        for node in self.discovered.drain() {
            sink.on_node_discovered(&node);
            delivered += 1;
        }
        for change in self.node_status.drain() {
            sink.on_node_status(&change);
            delivered += 1;
        }
        for data in self.node_data.drain() {
            sink.on_node_data(&data);
            delivered += 1;
        }
        for fault in self.faults.drain() {
            sink.on_fault(&fault);
            delivered += 1;
        }
        for reading in self.readings.drain() {
            sink.on_reading(&reading);
            delivered += 1;
        }
        delivered
    }

    /// Total events dropped across all queues.
    pub fn dropped(&self) -> u32 {
        self.readings.dropped()
            + self.faults.dropped()
            + self.discovered.dropped()
            + self.node_status.dropped()
            + self.node_data.dropped()
            + self.config.dropped()
    }
}

impl Default for FleetQueues {
    fn default() -> Self {
        Self::new()
    }
}
