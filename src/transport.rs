//! Transport abstraction.
//!
//! The coordinator talks to devices only through [`Transport`] and [`Link`].
//! [`BtleplugTransport`](crate::ble::BtleplugTransport) is the production
//! implementation; tests substitute a simulated device.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name.
    pub name: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Manufacturer specific advertisement data.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// When the advertisement was received.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Create a device record with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rssi: None,
            manufacturer_data: HashMap::new(),
            services: Vec::new(),
            discovered_at: Utc::now(),
        }
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Access to advertising peripherals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan for peripherals whose advertised name starts with `prefix`.
    ///
    /// The stream ends when `timeout` elapses. Dropping it stops the scan;
    /// a stopped scan is not restarted.
    async fn scan(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, DiscoveredDevice>>;

    /// Open a connection to a discovered peripheral.
    async fn open(&self, device: &DiscoveredDevice) -> Result<Box<dyn Link>>;
}

/// An open connection exchanging frames with named endpoints.
#[async_trait]
pub trait Link: Send + Sync {
    /// Write a frame to an endpoint.
    async fn write(&self, endpoint: &str, data: &[u8]) -> Result<()>;

    /// Read the pending response from an endpoint.
    async fn read(&self, endpoint: &str) -> Result<Vec<u8>>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}
