//! BLE communication module.
//!
//! This module provides the btleplug-backed transport used to discover
//! provisioning peripherals and exchange frames with their endpoints.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::CharacteristicHandler;
pub use connection::{ConnectionManager, ConnectionState};
pub use scanner::BleScanner;
pub use transport::{BleLink, BtleplugTransport};
pub use uuids::*;
