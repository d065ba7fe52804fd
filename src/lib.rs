//! SensorFleet firmware library.
//!
//! Sensor registry and polling, wireless node discovery, single-wire
//! bit-timing decode and calibration for an ESP32-S3 sensor hub. The
//! library builds and tests on the host; everything that touches ESP-IDF
//! is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod calibration;
pub mod config;
pub mod decoder;
pub mod drivers;
pub mod error;
pub mod events;
pub mod registry;
pub mod sensors;
pub mod types;
pub mod wireless;

pub use error::{Error, Result};
