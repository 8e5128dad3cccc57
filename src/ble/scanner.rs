//! BLE scanning functionality.
//!
//! Provides the scanner for discovering provisioning peripherals by name prefix.
//! Concurrent scans share the adapter's platform scan, which only stops once
//! the last of them ends.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::DiscoveredDevice;

/// BLE scanner for discovering provisioning peripherals.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Peripherals seen by any scan, by identifier.
    discovered: Arc<RwLock<HashMap<String, Peripheral>>>,
    /// Scans currently running on the adapter.
    active: ScanCount,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            discovered: Arc::new(RwLock::new(HashMap::new())),
            active: ScanCount::default(),
        }
    }

    /// Look up a peripheral reported by an earlier scan.
    pub fn peripheral(&self, identifier: &str) -> Option<Peripheral> {
        self.discovered.read().get(identifier).cloned()
    }

    /// Scan for peripherals whose local name starts with `prefix`.
    ///
    /// Every advertisement is forwarded, repeats included. The scan stops
    /// when `timeout` elapses or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn scan(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>> {
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        info!("Starting BLE scan for prefix {:?}", prefix);
        let adapter = self.adapter.clone();
        self.active
            .acquire(move || async move {
                adapter
                    .start_scan(ScanFilter::default())
                    .await
                    .map_err(Error::Bluetooth)
            })
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let adapter = self.adapter.clone();
        let active = self.active.clone();
        let discovered = self.discovered.clone();
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        debug!("Scan window elapsed");
                        break;
                    }
                    _ = tx.closed() => {
                        debug!("Scan receiver dropped");
                        break;
                    }
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            let Some(device) =
                                Self::process_peripheral(&adapter, id, &prefix, &discovered).await
                            else {
                                continue;
                            };
                            if tx.send(device).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            error!("Adapter event stream ended");
                            break;
                        }
                    }
                }
            }

            let stopper = adapter.clone();
            active
                .release(move || async move { stopper.stop_scan().await.map_err(Error::Bluetooth) })
                .await;
            debug!("Scan event loop ended");
        });

        Ok(rx)
    }

    /// Build a device record if the peripheral's name matches `prefix`.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        prefix: &str,
        discovered: &Arc<RwLock<HashMap<String, Peripheral>>>,
    ) -> Option<DiscoveredDevice> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let name = properties.local_name?;
        if !name.starts_with(prefix) {
            return None;
        }

        let identifier = id.to_string();
        trace!("Matched {} ({})", name, identifier);
        discovered.write().insert(identifier.clone(), peripheral);

        let mut device = DiscoveredDevice::new(identifier, name);
        device.rssi = properties.rssi;
        device.manufacturer_data = properties.manufacturer_data;
        device.services = properties.services;
        Some(device)
    }
}

/// Number of scans sharing one adapter.
#[derive(Debug, Clone, Default)]
struct ScanCount(Arc<Mutex<usize>>);

impl ScanCount {
    /// Register a scan, running `start` if no other scan is active.
    async fn acquire<F, Fut>(&self, start: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut active = self.0.lock().await;
        if *active == 0 {
            start().await?;
        }
        *active += 1;
        trace!("{} scans active", *active);
        Ok(())
    }

    /// Unregister a scan, running `stop` if it was the last one.
    async fn release<F, Fut>(&self, stop: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut active = self.0.lock().await;
        *active = active.saturating_sub(1);
        if *active > 0 {
            debug!("Scan ended, {} still active", *active);
            return;
        }
        if let Err(e) = stop().await {
            warn!("Failed to stop scan: {}", e);
        }
    }

    #[cfg(test)]
    async fn count(&self) -> usize {
        *self.0.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> futures::future::Ready<Result<()>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_overlapping_scans_share_platform_scan() {
        let active = ScanCount::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));

        active.acquire(counting(&starts)).await.unwrap();
        active.acquire(counting(&starts)).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(active.count().await, 2);

        // A one-shot scan ending must not stop a long-running one.
        active.release(counting(&stops)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        active.release(counting(&stops)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(active.count().await, 0);

        active.acquire(counting(&starts)).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_start_is_not_counted() {
        let active = ScanCount::default();
        let result = active
            .acquire(|| async { Err(Error::BluetoothUnavailable) })
            .await;

        assert!(matches!(result, Err(Error::BluetoothUnavailable)));
        assert_eq!(active.count().await, 0);
    }
}
