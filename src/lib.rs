// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # esp-ble-prov
//!
//! A cross-platform Rust library for provisioning ESP devices with Wi-Fi
//! credentials over Bluetooth Low Energy.
//!
//! Each operation is one self-contained session: find the device by its
//! advertised name, connect, run the security handshake, perform the request
//! and disconnect, whatever the outcome.
//!
//! ## Features
//!
//! - **Device Discovery**: List nearby devices by name prefix, deduplicated
//! - **Secure Sessions**: Unsecured, Secure1 and Secure2 handshakes using a
//!   proof of possession
//! - **Wi-Fi Scan**: List the networks a device can see, one-shot or streamed
//! - **Provisioning**: Send credentials and wait for the device to join
//! - **Custom Endpoints**: Exchange arbitrary bytes with application endpoints
//! - **Method Channel**: A name-and-arguments boundary for host applications
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esp_ble_prov::{ProofOfPossession, ProvisionConfig, Provisioner, Result, SecurityLevel};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let provisioner = Provisioner::ble(ProvisionConfig::default());
//!
//!     for name in provisioner.list_devices("PROV_", SecurityLevel::Secure1).await? {
//!         println!("Found device: {}", name);
//!     }
//!
//!     let pop = ProofOfPossession::from("abcd1234");
//!     let outcome = provisioner
//!         .apply_wifi_credentials("PROV_1A2B3C", &pop, "home", "hunter22", SecurityLevel::Secure1)
//!         .await?;
//!     println!("Provisioning finished: {:?}", outcome);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for config and data types

// Public modules
pub mod ble;
pub mod channel;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod provisioner;
pub mod security;
pub mod stream;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod sim;

// Re-exports for convenience
pub use channel::{ChannelError, MethodCall, MethodChannel, Reply, Responder};
pub use config::{ProvisionConfig, WifiScanParams};
pub use error::{Error, Result};
pub use provisioner::Provisioner;
pub use security::{ProofOfPossession, SecureSession, SecurityLevel};
pub use stream::{StreamEvent, StreamHandle};
pub use transport::{DiscoveredDevice, Link, Transport};

// Re-export commonly used types from submodules
pub use ble::{BtleplugTransport, ConnectionState};
pub use data::{FailureReason, ProvisioningOutcome, WifiAuthMode, WifiNetwork, WifiStationState};
