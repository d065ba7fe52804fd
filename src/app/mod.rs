//! Application layer: configuration management and the port boundary.
//!
//! Everything the fleet core needs from the outside world is expressed
//! as a **port trait** in [`ports`]; [`config_store`] owns the descriptor
//! set the application boots from and persists it through those ports.

pub mod config_store;
pub mod ports;
