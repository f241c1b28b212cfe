//! Testing utilities and mock implementations
//!
//! Lets the shadow bridge be exercised without an MQTT broker or a media
//! player on the network.

pub mod mocks;

pub use mocks::*;
