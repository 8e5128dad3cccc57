//! GATT characteristic handling.
//!
//! Maps the characteristics of the provisioning service to endpoint names
//! and performs the write-then-read exchanges the firmware expects.

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::uuids::{default_endpoint_name, short_id, USER_DESCRIPTION_DESCRIPTOR_UUID};
use crate::error::{Error, Result};

/// Endpoint characteristics of one connected peripheral.
pub struct CharacteristicHandler {
    peripheral: Peripheral,
    endpoints: RwLock<HashMap<String, Characteristic>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Map every characteristic of `service` to an endpoint name.
    ///
    /// The user description descriptor wins; characteristics without one
    /// fall back to the short id convention. Returns the number of endpoints.
    pub async fn discover_endpoints(&self, service: Uuid) -> Result<usize> {
        let characteristics: Vec<Characteristic> = self
            .peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics)
            .collect();

        if characteristics.is_empty() {
            return Err(Error::ConnectionFailed {
                reason: format!("Provisioning service {} not found", service),
            });
        }

        let mut endpoints = HashMap::new();
        for characteristic in characteristics {
            match self.endpoint_name(&service, &characteristic).await {
                Some(name) => {
                    debug!("Endpoint {} -> {}", name, characteristic.uuid);
                    endpoints.insert(name, characteristic);
                }
                None => trace!("Unnamed characteristic {}", characteristic.uuid),
            }
        }

        let count = endpoints.len();
        *self.endpoints.write() = endpoints;
        debug!("Discovered {} endpoints", count);
        Ok(count)
    }

    async fn endpoint_name(&self, service: &Uuid, characteristic: &Characteristic) -> Option<String> {
        let descriptor = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == USER_DESCRIPTION_DESCRIPTOR_UUID);

        if let Some(descriptor) = descriptor {
            match self.peripheral.read_descriptor(descriptor).await {
                Ok(raw) => match String::from_utf8(raw) {
                    Ok(name) if !name.is_empty() => {
                        return Some(name.trim_end_matches('\0').to_string())
                    }
                    _ => warn!("Unreadable description on {}", characteristic.uuid),
                },
                Err(e) => warn!("Failed to read description of {}: {}", characteristic.uuid, e),
            }
        }

        short_id(service, &characteristic.uuid)
            .and_then(default_endpoint_name)
            .map(str::to_string)
    }

    fn characteristic(&self, endpoint: &str) -> Result<Characteristic> {
        self.endpoints
            .read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| Error::EndpointNotFound {
                endpoint: endpoint.to_string(),
            })
    }

    /// Write a frame to an endpoint.
    pub async fn write(&self, endpoint: &str, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(endpoint)?;

        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to {}", data.len(), endpoint);
        Ok(())
    }

    /// Read the current value of an endpoint.
    pub async fn read(&self, endpoint: &str) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(endpoint)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from {}", data.len(), endpoint);
        Ok(data)
    }
}
