//! Data structures for provisioning results.
//!
//! This module contains the Wi-Fi network, station state and provisioning
//! outcome types shared by the protocol and the coordinator.

pub mod wifi;

pub use wifi::{FailureReason, ProvisioningOutcome, WifiAuthMode, WifiNetwork, WifiStationState};
