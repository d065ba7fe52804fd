//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                 |
//! |----------------|--------------------|-----------------------------|
//! | `hardware`     | HardwarePort       | ESP32-S3 GPIO, ADC1, timers |
//! | `sim_hal`      | HardwarePort       | Scripted host simulation    |
//! | `log_sink`     | EventSink          | Serial log output           |
//! | `nvs`          | StoragePort        | ESP-IDF NVS partition       |
//! | `memory_store` | StoragePort        | In-memory map (host/tests)  |
//! | `time`         | —                  | Epoch and monotonic clocks  |

#[cfg(target_os = "espidf")]
pub mod hardware;
pub mod log_sink;
pub mod memory_store;
#[cfg(target_os = "espidf")]
pub mod nvs;
pub mod sim_hal;
pub mod time;
