//! Execution helpers shared by the fleet subsystems.

pub mod worker;
