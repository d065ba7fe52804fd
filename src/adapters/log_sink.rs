//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing one structured line per fleet event
//! to the logger (UART / USB-CDC on the device, stderr on the host).
//! A future MQTT or BLE uplink would implement the same trait.

use log::{info, warn};

use crate::app::config_store::ConfigChange;
use crate::app::ports::EventSink;
use crate::registry::SensorFault;
use crate::types::SensorReading;
use crate::wireless::{NodeData, NodeInfo, NodeStatusChange};

/// Adapter that logs every fleet event to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    readings: u64,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readings seen since construction.
    pub fn readings_logged(&self) -> u64 {
        self.readings
    }
}

impl EventSink for LogEventSink {
    fn on_reading(&mut self, r: &SensorReading) {
        self.readings += 1;
        if r.is_valid {
            info!(
                "READ  | {} | {}={:.2}{} | t={}",
                r.sensor_id,
                r.key(),
                r.value,
                r.unit,
                r.timestamp_ms
            );
        } else {
            info!("READ  | {} | invalid | t={}", r.sensor_id, r.timestamp_ms);
        }
    }

    fn on_fault(&mut self, fault: &SensorFault) {
        warn!(
            "FAULT | {} | {} | consecutive={}",
            fault.sensor_id, fault.error, fault.error_count
        );
    }

    fn on_node_discovered(&mut self, node: &NodeInfo) {
        info!(
            "NODE  | discovered {} via {} | mac={} rssi={}",
            node.node_id, node.protocol, node.mac_address, node.rssi
        );
    }

    fn on_node_status(&mut self, change: &NodeStatusChange) {
        info!(
            "NODE  | {} | {} -> {}",
            change.node_id, change.previous, change.current
        );
    }

    fn on_node_data(&mut self, data: &NodeData) {
        info!(
            "DATA  | {} | topic={} | {}",
            data.node_id,
            data.topic.as_deref().unwrap_or("-"),
            data.payload
        );
    }

    fn on_config_changed(&mut self, change: &ConfigChange) {
        info!(
            "CONF  | {:?} | sensor={}",
            change.kind,
            change.sensor_id.as_deref().unwrap_or("*")
        );
    }
}
