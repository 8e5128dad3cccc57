//! Provisioning session coordinator.
//!
//! Every operation runs its own discover, connect, handshake, request and
//! disconnect sequence. Sessions are never shared between calls and are
//! closed on every terminal outcome, including errors and stops.

use futures::future;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::ble::BtleplugTransport;
use crate::config::ProvisionConfig;
use crate::data::wifi::{FailureReason, ProvisioningOutcome, WifiNetwork};
use crate::error::{Error, Result};
use crate::protocol::frame::WireMessage;
use crate::protocol::wifi::{
    check_status, ApplyConfig, ApplyConfigResponse, GetStatus, GetStatusResponse, ScanResult,
    ScanResultResponse, ScanStart, ScanStartResponse, ScanStatus, ScanStatusResponse, SetConfig,
    SetConfigResponse, MAX_RESULTS_PER_PAGE,
};
use crate::security::{self, ProofOfPossession, SecureSession, SecurityLevel};
use crate::stream::{emit, StopSignal, StreamEvent, StreamHandle};
use crate::transport::{DiscoveredDevice, Transport};
use crate::utils::FirstSeen;

/// Endpoint carrying Wi-Fi scan requests.
pub const SCAN_ENDPOINT: &str = "prov-scan";
/// Endpoint carrying Wi-Fi configuration requests.
pub const CONFIG_ENDPOINT: &str = "prov-config";

/// Coordinates provisioning sessions over a [`Transport`].
pub struct Provisioner<T = BtleplugTransport> {
    transport: Arc<T>,
    config: Arc<ProvisionConfig>,
    stream_counter: Arc<AtomicU64>,
}

impl<T> Clone for Provisioner<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            stream_counter: self.stream_counter.clone(),
        }
    }
}

impl Provisioner<BtleplugTransport> {
    /// Create a provisioner using the platform Bluetooth stack.
    pub fn ble(config: ProvisionConfig) -> Self {
        Self::new(BtleplugTransport::new(), config)
    }
}

impl<T: Transport + 'static> Provisioner<T> {
    /// Create a provisioner over any transport.
    pub fn new(transport: T, config: ProvisionConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            stream_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// List the names of nearby devices whose name starts with `prefix`.
    ///
    /// Names are reported once each, in first-seen order. A host without
    /// Bluetooth yields an empty list.
    pub async fn list_devices(&self, prefix: &str, security: SecurityLevel) -> Result<Vec<String>> {
        debug!("Listing {} devices with prefix {:?}", security, prefix);

        let stream = match self.transport.scan(prefix, self.config.scan_timeout).await {
            Ok(stream) => stream,
            Err(e) if e.is_bluetooth_unavailable() => {
                info!("Bluetooth unavailable, reporting no devices");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut seen = FirstSeen::default();
        let names: Vec<String> = stream
            .map(|device| device.name)
            .filter(|name| future::ready(seen.insert(name)))
            .collect()
            .await;

        info!("Found {} devices", names.len());
        Ok(names)
    }

    /// List the SSIDs of networks visible to a device.
    pub async fn list_wifi_networks(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        security: SecurityLevel,
    ) -> Result<Vec<String>> {
        let networks = self
            .list_wifi_networks_detailed(device_name, pop, security)
            .await?;
        Ok(networks.into_iter().map(|n| n.ssid).collect())
    }

    /// List networks visible to a device, with signal strength and auth mode.
    ///
    /// The session is closed whether or not the scan succeeds.
    pub async fn list_wifi_networks_detailed(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        security: SecurityLevel,
    ) -> Result<Vec<WifiNetwork>> {
        let mut session = self.open_session(device_name, pop, security).await?;
        let result = self.fetch_networks(&mut session).await;
        close_session(session).await;

        let networks = result?;
        info!("{} sees {} networks", device_name, networks.len());
        Ok(networks)
    }

    /// Send Wi-Fi credentials to a device and wait for it to join.
    ///
    /// Resolves once, on the first terminal outcome. The intermediate
    /// [`ProvisioningOutcome::ConfigApplied`] is never returned. Errors before
    /// the session is established are returned as they are; once it is, any
    /// failure to apply the credentials is reported as a
    /// [`ProvisioningOutcome::Failure`].
    pub async fn apply_wifi_credentials(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        ssid: &str,
        passphrase: &str,
        security: SecurityLevel,
    ) -> Result<ProvisioningOutcome> {
        let mut session = self.open_session(device_name, pop, security).await?;

        let (tx, mut outcomes) = mpsc::channel(self.config.event_capacity);
        let credentials = SetConfig {
            ssid: ssid.to_string(),
            passphrase: passphrase.to_string(),
        };
        let producer = report_outcomes(&mut session, &self.config, credentials, tx);
        let consumer = async move {
            while let Some(outcome) = outcomes.recv().await {
                if outcome.is_terminal() {
                    return Some(outcome);
                }
                debug!("Configuration applied on {}, waiting for it to join", device_name);
            }
            None
        };

        let (result, terminal) = tokio::join!(producer, consumer);
        close_session(session).await;

        let outcome = match (terminal, result) {
            (Some(outcome), _) => outcome,
            (None, Err(e)) => {
                warn!("Provisioning {} failed: {}", device_name, e);
                ProvisioningOutcome::Failure(FailureReason::Other(e.to_string()))
            }
            (None, Ok(())) => {
                return Err(Error::Internal(
                    "outcome stream ended without a terminal outcome".to_string(),
                ))
            }
        };
        info!("Provisioning {} finished: {:?}", device_name, outcome);
        Ok(outcome)
    }

    /// Send `data` to the application endpoint `path` and return the reply.
    ///
    /// Handshake failures are returned as they are and nothing is written to
    /// the endpoint.
    pub async fn send_application_data(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        path: &str,
        data: &[u8],
        security: SecurityLevel,
    ) -> Result<Vec<u8>> {
        let mut session = self.open_session(device_name, pop, security).await?;

        debug!("Sending {} bytes to {}", data.len(), path);
        let result = session.request(path, data).await;
        close_session(session).await;

        result.map_err(|e| match e {
            Error::DisconnectedUnexpectedly => e,
            other => Error::EndpointSendFailed {
                endpoint: path.to_string(),
                code: other.code(),
                message: other.to_string(),
            },
        })
    }

    /// Stream device names matching `prefix` into `sink` until stopped.
    ///
    /// Each name is reported once per run.
    pub fn start_device_discovery(
        &self,
        prefix: &str,
        sink: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        let id = self.next_stream_id();
        let (stop_tx, mut stop) = StopSignal::new();
        let transport = self.transport.clone();
        let prefix = prefix.to_string();

        let task = tokio::spawn(async move {
            let mut devices = match transport.scan(&prefix, Duration::MAX).await {
                Ok(devices) => devices,
                Err(e) if e.is_bluetooth_unavailable() => {
                    info!("Bluetooth unavailable, discovery stream {} ends", id);
                    return;
                }
                Err(e) => {
                    emit(&sink, &mut stop, StreamEvent::Error(e)).await;
                    return;
                }
            };

            let mut seen = FirstSeen::default();
            loop {
                let device = tokio::select! {
                    biased;
                    _ = stop.wait() => break,
                    device = devices.next() => device,
                };
                let Some(device) = device else {
                    break;
                };
                if !seen.insert(&device.name) {
                    continue;
                }
                trace!("Discovery stream {} reports {}", id, device.name);
                if !emit(&sink, &mut stop, StreamEvent::Device(device.name)).await {
                    break;
                }
            }

            debug!("Discovery stream {} ended after {} devices", id, seen.len());
        });

        StreamHandle::new(id, stop_tx, task)
    }

    /// Stream the networks a device sees into `sink`, then close the session.
    ///
    /// Failures are delivered as a final [`StreamEvent::Error`].
    pub fn start_wifi_scan(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        security: SecurityLevel,
        sink: mpsc::Sender<StreamEvent>,
    ) -> StreamHandle {
        let id = self.next_stream_id();
        let (stop_tx, mut stop) = StopSignal::new();
        let this = self.clone();
        let device_name = device_name.to_string();
        let pop = pop.clone();

        let task = tokio::spawn(async move {
            let result = this
                .stream_networks(&device_name, &pop, security, &sink, &mut stop)
                .await;
            if let Err(e) = result {
                emit(&sink, &mut stop, StreamEvent::Error(e)).await;
            }
            debug!("Wi-Fi scan stream {} ended", id);
        });

        StreamHandle::new(id, stop_tx, task)
    }

    async fn stream_networks(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        security: SecurityLevel,
        sink: &mpsc::Sender<StreamEvent>,
        stop: &mut StopSignal,
    ) -> Result<()> {
        // An abandoned open drops its link, which closes it.
        let mut session = tokio::select! {
            biased;
            _ = stop.wait() => return Ok(()),
            session = self.open_session(device_name, pop, security) => session?,
        };
        let result = if stop.is_stopped() {
            Ok(())
        } else {
            self.emit_networks(&mut session, sink, stop).await
        };
        close_session(session).await;
        result
    }

    async fn emit_networks(
        &self,
        session: &mut SecureSession,
        sink: &mpsc::Sender<StreamEvent>,
        stop: &mut StopSignal,
    ) -> Result<()> {
        let total = tokio::select! {
            biased;
            _ = stop.wait() => return Ok(()),
            total = self.start_scan(session) => total?,
        };
        let mut fetched = 0u16;

        while fetched < total {
            let page = tokio::select! {
                biased;
                _ = stop.wait() => return Ok(()),
                page = self.fetch_page(session, fetched, total) => page?,
            };
            fetched += page.len() as u16;

            for network in page {
                let event = StreamEvent::Network {
                    ssid: network.ssid,
                    rssi: network.rssi,
                };
                if !emit(sink, stop, event).await {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn find_device(&self, name: &str) -> Result<DiscoveredDevice> {
        debug!("Looking for {}", name);
        let stream = self.transport.scan(name, self.config.scan_timeout).await?;
        let device = stream
            .filter(|device| future::ready(device.name == name))
            .next()
            .await;

        device.ok_or_else(|| Error::DeviceNotFound {
            name: name.to_string(),
        })
    }

    async fn open_session(
        &self,
        device_name: &str,
        pop: &ProofOfPossession,
        security: SecurityLevel,
    ) -> Result<SecureSession> {
        let device = self.find_device(device_name).await?;

        info!("Connecting to {} ({})", device.name, device.id);
        let link = tokio::time::timeout(self.config.connect_timeout, self.transport.open(&device))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {}", device_name)))??;

        match security::handshake(
            link,
            security,
            pop,
            &self.config.sec2_username,
            self.config.response_timeout,
        )
        .await
        {
            Ok(session) => Ok(session),
            Err((link, e)) => {
                if let Err(close_err) = link.close().await {
                    warn!("Failed to close link after handshake failure: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn start_scan(&self, session: &mut SecureSession) -> Result<u16> {
        let started: ScanStartResponse = request(
            session,
            SCAN_ENDPOINT,
            &ScanStart {
                params: self.config.wifi_scan,
            },
        )
        .await?;
        check_status(started.status)?;

        for _ in 0..=self.config.max_status_polls {
            let status: ScanStatusResponse = request(session, SCAN_ENDPOINT, &ScanStatus).await?;
            check_status(status.status)?;
            if status.finished {
                debug!("Device scan found {} networks", status.result_count);
                return Ok(status.result_count);
            }
            tokio::time::sleep(self.config.status_poll_interval).await;
        }

        Err(Error::timeout("Wi-Fi scan on device"))
    }

    async fn fetch_page(
        &self,
        session: &mut SecureSession,
        start_index: u16,
        total: u16,
    ) -> Result<Vec<WifiNetwork>> {
        let count = (total - start_index).min(u16::from(MAX_RESULTS_PER_PAGE)) as u8;
        let page: ScanResultResponse = request(
            session,
            SCAN_ENDPOINT,
            &ScanResult { start_index, count },
        )
        .await?;
        check_status(page.status)?;

        if page.entries.is_empty() || page.entries.len() > usize::from(count) {
            return Err(Error::InvalidData {
                context: format!(
                    "scan result page at index {} has {} entries, requested {}",
                    start_index,
                    page.entries.len(),
                    count
                ),
            });
        }
        Ok(page.entries)
    }

    async fn fetch_networks(&self, session: &mut SecureSession) -> Result<Vec<WifiNetwork>> {
        let total = self.start_scan(session).await?;
        let mut networks = Vec::with_capacity(usize::from(total));

        while networks.len() < usize::from(total) {
            let page = self.fetch_page(session, networks.len() as u16, total).await?;
            networks.extend(page);
        }

        Ok(networks)
    }

    fn next_stream_id(&self) -> u64 {
        self.stream_counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Send one typed request and decode the typed reply.
async fn request<Req, Resp>(session: &mut SecureSession, endpoint: &str, message: &Req) -> Result<Resp>
where
    Req: WireMessage,
    Resp: WireMessage,
{
    trace!("{:?} -> {}", Req::TYPE, endpoint);
    let reply = session.request(endpoint, &message.to_bytes()?).await?;
    Resp::from_bytes(&reply)
}

async fn close_session(session: SecureSession) {
    if let Err(e) = session.close().await {
        warn!("Failed to close session: {}", e);
    }
}

/// Apply credentials and push outcomes until a terminal one is sent.
async fn report_outcomes(
    session: &mut SecureSession,
    config: &ProvisionConfig,
    credentials: SetConfig,
    outcomes: mpsc::Sender<ProvisioningOutcome>,
) -> Result<()> {
    debug!("Sending credentials for {:?}", credentials.ssid);
    let sent: SetConfigResponse = request(session, CONFIG_ENDPOINT, &credentials).await?;
    check_status(sent.status)?;

    let applied: ApplyConfigResponse = request(session, CONFIG_ENDPOINT, &ApplyConfig).await?;
    check_status(applied.status)?;
    let _ = outcomes.send(ProvisioningOutcome::ConfigApplied).await;

    for poll in 0..config.max_status_polls {
        tokio::time::sleep(config.status_poll_interval).await;

        let status: GetStatusResponse = request(session, CONFIG_ENDPOINT, &GetStatus).await?;
        check_status(status.status)?;
        trace!("Status poll {}: {:?}", poll, status.state);

        if let Some(outcome) = status.state.outcome() {
            let _ = outcomes.send(outcome).await;
            return Ok(());
        }
    }

    warn!(
        "Device did not join within {} status polls",
        config.max_status_polls
    );
    let _ = outcomes
        .send(ProvisioningOutcome::Failure(FailureReason::Other(
            "timed out".to_string(),
        )))
        .await;
    Ok(())
}
