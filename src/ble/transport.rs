//! [`Transport`] implementation backed by btleplug.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::connection::ConnectionManager;
use crate::ble::scanner::BleScanner;
use crate::ble::uuids::PROV_SERVICE_UUID;
use crate::error::{Error, Result};
use crate::transport::{DiscoveredDevice, Link, Transport};
use crate::utils::receiver_stream;

/// Talks to real peripherals through the platform Bluetooth stack.
///
/// The adapter is acquired on first use, so a host without Bluetooth only
/// fails once something actually scans.
pub struct BtleplugTransport {
    scanner: OnceCell<BleScanner>,
    service: Uuid,
}

impl BtleplugTransport {
    /// Create a transport for the default provisioning service.
    pub fn new() -> Self {
        Self::with_service(PROV_SERVICE_UUID)
    }

    /// Create a transport for devices exposing a non-default service UUID.
    pub fn with_service(service: Uuid) -> Self {
        Self {
            scanner: OnceCell::new(),
            service,
        }
    }

    async fn scanner(&self) -> Result<&BleScanner> {
        self.scanner.get_or_try_init(BleScanner::new).await
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn scan(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, DiscoveredDevice>> {
        let rx = self.scanner().await?.scan(prefix, timeout).await?;
        Ok(receiver_stream(rx))
    }

    async fn open(&self, device: &DiscoveredDevice) -> Result<Box<dyn Link>> {
        let peripheral = self
            .scanner()
            .await?
            .peripheral(&device.id)
            .ok_or_else(|| Error::DeviceNotFound {
                name: device.name.clone(),
            })?;

        let connection = ConnectionManager::new(peripheral.clone());
        connection.connect().await?;

        let characteristics = CharacteristicHandler::new(peripheral);
        if let Err(e) = characteristics.discover_endpoints(self.service).await {
            let _ = connection.disconnect().await;
            return Err(e);
        }

        Ok(Box::new(BleLink {
            connection,
            characteristics,
        }))
    }
}

/// An open GATT connection to a provisioning peripheral.
pub struct BleLink {
    connection: ConnectionManager,
    characteristics: CharacteristicHandler,
}

impl BleLink {
    /// Report a transport failure as a disconnect when the link is gone.
    async fn classify(&self, e: Error) -> Error {
        match e {
            Error::Bluetooth(_) if !self.connection.refresh().await.is_connected() => {
                warn!("Device disconnected during exchange");
                Error::DisconnectedUnexpectedly
            }
            other => other,
        }
    }
}

#[async_trait]
impl Link for BleLink {
    async fn write(&self, endpoint: &str, data: &[u8]) -> Result<()> {
        match self.characteristics.write(endpoint, data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.classify(e).await),
        }
    }

    async fn read(&self, endpoint: &str) -> Result<Vec<u8>> {
        match self.characteristics.read(endpoint).await {
            Ok(data) => Ok(data),
            Err(e) => Err(self.classify(e).await),
        }
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing BLE link");
        self.connection.disconnect().await
    }
}
