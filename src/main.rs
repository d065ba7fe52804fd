//! SensorFleet Firmware: Main Entry Point
//!
//! Wires the fleet core to the ESP32-S3 adapters and runs the event pump.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspHardware        NvsStore          LogEventSink             │
//! │  (HardwarePort)     (StoragePort)     (EventSink)              │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │ SensorRegistry · WirelessNodeManager · Calibration     │    │
//! │  │ SensorConfigStore                                      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  FleetQueues (worker callbacks ──▶ main-task dispatch)         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{info, warn};

use sensorfleet::adapters::hardware::EspHardware;
use sensorfleet::adapters::log_sink::LogEventSink;
use sensorfleet::adapters::nvs::NvsStore;
use sensorfleet::app::config_store::SensorConfigStore;
use sensorfleet::app::ports::SharedHardware;
use sensorfleet::calibration::CalibrationEngine;
use sensorfleet::config::FleetConfig;
use sensorfleet::events::FleetQueues;
use sensorfleet::registry::SensorRegistry;
use sensorfleet::sensors::remote::{self, RemoteSensor};
use sensorfleet::wireless::{ALL_PROTOCOLS, WirelessNodeManager};

/// Main-task dispatch period.
const DISPATCH_PERIOD: Duration = Duration::from_millis(100);

/// How often calibration records are flushed to NVS.
const CALIBRATION_FLUSH_PERIOD: Duration = Duration::from_secs(300);

/// Descriptor installed when NVS holds no sensor set yet.
const FALLBACK_SENSOR_ID: &str = "dht22-gpio4";
const FALLBACK_PROTOCOL: &str = "DHT22";
const FALLBACK_PIN: u8 = 4;

fn main() -> Result<()> {
    // ── 1. Runtime ────────────────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SensorFleet v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Storage and tunables ───────────────────────────────
    let mut nvs = NvsStore::new().map_err(|e| anyhow!("NVS init: {e}"))?;
    let config = FleetConfig::load(&nvs);

    // ── 3. Core ───────────────────────────────────────────────
    let hardware: SharedHardware = Arc::new(Mutex::new(
        EspHardware::new().map_err(|e| anyhow!("hardware init: {e}"))?,
    ));

    let calibration = Arc::new(CalibrationEngine::new());
    match calibration.load(&nvs) {
        Ok(n) => info!("Boot: {} calibration record(s) restored", n),
        Err(e) => warn!("Boot: no calibration records restored ({})", e),
    }

    let registry = SensorRegistry::new(hardware, Arc::clone(&calibration), &config);
    let manager = WirelessNodeManager::new(&config);
    registry.register_driver(remote::DRIVER, RemoteSensor::constructor(manager.clone()))?;

    let config_store = SensorConfigStore::new();
    let queues = FleetQueues::new();
    queues.install(&registry, &manager, &config_store);

    // ── 4. Sensor set ─────────────────────────────────────────
    if let Err(e) = config_store.load(&nvs) {
        warn!("Boot: no stored sensor set ({}), installing fallback", e);
        let fallback = SensorConfigStore::descriptor_from_protocol(
            FALLBACK_PROTOCOL,
            FALLBACK_SENSOR_ID,
            FALLBACK_PIN,
        )?;
        config_store.set(fallback)?;
        if let Err(e) = config_store.save(&mut nvs) {
            warn!("Boot: sensor set not persisted: {}", e);
        }
    }

    for descriptor in config_store.all() {
        let id = descriptor.id.clone();
        if let Err(e) = registry.add_descriptor(descriptor) {
            warn!("Boot: sensor '{}' not started: {}", id, e);
        }
    }
    info!("Boot: {} of {} sensor(s) online", registry.len(), config_store.len());

    // ── 5. Workers ────────────────────────────────────────────
    registry.start_reading(config.polling_interval(), queues.reading_callback())?;

    if manager.registered_protocols().is_empty() {
        info!("Boot: no wireless protocols registered, discovery skipped");
    } else {
        manager.start_discovery(ALL_PROTOCOLS, config.discovery_timeout())?;
    }

    // ── 6. Event pump ─────────────────────────────────────────
    info!("System ready. Entering event loop.");
    let mut sink = LogEventSink::new();
    let mut last_flush = Instant::now();
    loop {
        queues.dispatch(&mut sink);

        if last_flush.elapsed() >= CALIBRATION_FLUSH_PERIOD {
            last_flush = Instant::now();
            if let Err(e) = calibration.save(&mut nvs) {
                warn!("Calibration: flush failed: {}", e);
            }
            let dropped = queues.dropped();
            if dropped > 0 {
                warn!("Events: {} dropped since boot", dropped);
            }
        }

        std::thread::sleep(DISPATCH_PERIOD);
    }
}
