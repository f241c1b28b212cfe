//! Service lifecycle: the delta consumer and the settings-driven
//! start/stop controller

pub mod lifecycle;
pub mod worker;

pub use lifecycle::{BridgeService, LIVENESS_TICK};
pub use worker::DeltaWorker;
