//! Runtime glue: configuration, clocks, telemetry and the runner that wires
//! the poller and fetch queue together.

pub mod clock;
pub mod config;
pub mod runner;
pub mod telemetry;
