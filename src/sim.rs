//! Simulated provisioning device for tests.
//!
//! [`SimDevice`] answers the session, scan, config and custom endpoints the
//! way firmware would, and records every write and close so tests can check
//! ordering. [`SimTransport`] advertises a list of devices.

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::data::wifi::{WifiNetwork, WifiStationState};
use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, MessageType, WireMessage};
use crate::protocol::session::{
    SessionCommand0, SessionCommand1, SessionResponse0, SessionResponse1, STATUS_OK,
};
use crate::protocol::wifi::{
    ApplyConfigResponse, GetStatusResponse, ScanResult, ScanResultResponse, ScanStartResponse,
    ScanStatusResponse, SetConfig, SetConfigResponse,
};
use crate::security::{derive_sec1_key, derive_sec2_key, ProofOfPossession, Role, SessionCipher};
use crate::security::SecurityLevel;
use crate::transport::{DiscoveredDevice, Link, Transport};
use crate::utils::receiver_stream;

/// Something that happened on a simulated device, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A frame was written to an endpoint.
    Write(String),
    /// A status poll was answered with this state.
    Status(WifiStationState),
    /// The link was closed.
    Close,
}

/// Behaviour of a custom application endpoint.
#[derive(Debug, Clone)]
pub enum SimEndpoint {
    /// Reply with the request prefixed by these bytes.
    Echo(Vec<u8>),
    /// Fail the write with a device error.
    Fail(u8),
}

enum HandshakeState {
    Idle,
    AwaitingVerify {
        cipher: SessionCipher,
        device_pubkey: [u8; 32],
        client_pubkey: [u8; 32],
    },
    Established(SessionCipher),
}

struct SimState {
    security: SecurityLevel,
    pop: ProofOfPossession,
    handshake: HandshakeState,
    pending: HashMap<String, VecDeque<Vec<u8>>>,
    networks: Vec<WifiNetwork>,
    scan_status: u8,
    scan_finishes: bool,
    oversized_pages: bool,
    status_script: VecDeque<WifiStationState>,
    last_status: WifiStationState,
    endpoints: HashMap<String, SimEndpoint>,
    credentials: Option<(String, String)>,
    events: Vec<SimEvent>,
    writes: Vec<(String, Vec<u8>)>,
    fail_open: bool,
    disconnect_on: Option<String>,
}

/// A simulated provisioning device. Clones share state.
#[derive(Clone)]
pub struct SimDevice {
    id: String,
    name: String,
    adverts: usize,
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    /// Create an unsecured device that advertises once.
    pub fn new(name: &str) -> Self {
        Self::with_id(name, &format!("sim-{}", name))
    }

    /// Create a device with an explicit peripheral id.
    pub fn with_id(name: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            adverts: 1,
            state: Arc::new(Mutex::new(SimState {
                security: SecurityLevel::Unsecured,
                pop: ProofOfPossession::from(""),
                handshake: HandshakeState::Idle,
                pending: HashMap::new(),
                networks: Vec::new(),
                scan_status: STATUS_OK,
                scan_finishes: true,
                oversized_pages: false,
                status_script: VecDeque::new(),
                last_status: WifiStationState::Connecting,
                endpoints: HashMap::new(),
                credentials: None,
                events: Vec::new(),
                writes: Vec::new(),
                fail_open: false,
                disconnect_on: None,
            })),
        }
    }

    /// Require a handshake at `level` with `pop`.
    pub fn with_security(self, level: SecurityLevel, pop: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.security = level;
            state.pop = ProofOfPossession::from(pop);
        }
        self
    }

    /// Advertise this many times per scan.
    pub fn with_adverts(mut self, adverts: usize) -> Self {
        self.adverts = adverts;
        self
    }

    /// Networks returned by a Wi-Fi scan.
    pub fn with_networks(self, networks: Vec<WifiNetwork>) -> Self {
        self.state.lock().networks = networks;
        self
    }

    /// Make the scan start request fail with `status`.
    pub fn with_scan_error(self, status: u8) -> Self {
        self.state.lock().scan_status = status;
        self
    }

    /// Keep reporting the Wi-Fi scan as unfinished.
    pub fn with_endless_scan(self) -> Self {
        self.state.lock().scan_finishes = false;
        self
    }

    /// Return every remaining network on each result page, ignoring the
    /// requested count.
    pub fn with_oversized_pages(self) -> Self {
        self.state.lock().oversized_pages = true;
        self
    }

    /// States returned by successive status polls; the last one repeats.
    pub fn with_status_script(self, script: Vec<WifiStationState>) -> Self {
        {
            let mut state = self.state.lock();
            if let Some(last) = script.last() {
                state.last_status = last.clone();
            }
            state.status_script = script.into();
        }
        self
    }

    /// Register a custom endpoint.
    pub fn with_endpoint(self, name: &str, endpoint: SimEndpoint) -> Self {
        self.state.lock().endpoints.insert(name.to_string(), endpoint);
        self
    }

    /// Refuse connections.
    pub fn failing_open(self) -> Self {
        self.state.lock().fail_open = true;
        self
    }

    /// Drop the connection when `endpoint` is written.
    pub fn disconnecting_on(self, endpoint: &str) -> Self {
        self.state.lock().disconnect_on = Some(endpoint.to_string());
        self
    }

    /// Advertised name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything that happened so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Raw writes so far, as `(endpoint, bytes)`.
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    /// Number of times the link was closed.
    pub fn close_count(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, SimEvent::Close))
            .count()
    }

    /// Credentials received, if any.
    pub fn credentials(&self) -> Option<(String, String)> {
        self.state.lock().credentials.clone()
    }

    fn advert(&self) -> DiscoveredDevice {
        DiscoveredDevice::new(self.id.clone(), self.name.clone()).with_rssi(-50)
    }
}

impl SimState {
    fn handle_session(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let frame = Frame::parse(data)?;
        match frame.message_type {
            MessageType::SessionCommand0 => {
                let command = SessionCommand0::from_bytes(data)?;
                let secret = EphemeralSecret::random_from_rng(OsRng);
                let device_pubkey = PublicKey::from(&secret).to_bytes();
                let shared = secret.diffie_hellman(&PublicKey::from(command.client_pubkey));

                let mut device_random = [0u8; 16];
                OsRng.fill_bytes(&mut device_random);

                let (key, salt) = match (self.security, command.username.as_deref()) {
                    (SecurityLevel::Secure2, Some(username)) => {
                        let mut salt = [0u8; 16];
                        OsRng.fill_bytes(&mut salt);
                        (
                            derive_sec2_key(shared.as_bytes(), &salt, username, &self.pop),
                            Some(salt),
                        )
                    }
                    (SecurityLevel::Secure1, None) => {
                        (derive_sec1_key(shared.as_bytes(), &self.pop), None)
                    }
                    _ => {
                        return SessionResponse0 {
                            status: 2,
                            device_pubkey,
                            device_random,
                            salt: None,
                        }
                        .to_bytes()
                    }
                };

                self.handshake = HandshakeState::AwaitingVerify {
                    cipher: SessionCipher::new(key, &device_random, Role::Device),
                    device_pubkey,
                    client_pubkey: command.client_pubkey,
                };

                SessionResponse0 {
                    status: STATUS_OK,
                    device_pubkey,
                    device_random,
                    salt,
                }
                .to_bytes()
            }
            MessageType::SessionCommand1 => {
                let command = SessionCommand1::from_bytes(data)?;
                let state = std::mem::replace(&mut self.handshake, HandshakeState::Idle);
                let HandshakeState::AwaitingVerify {
                    mut cipher,
                    device_pubkey,
                    client_pubkey,
                } = state
                else {
                    return SessionResponse1 {
                        status: 2,
                        device_verify: Vec::new(),
                    }
                    .to_bytes();
                };

                match cipher.decrypt(&command.client_verify) {
                    Ok(proof) if proof == device_pubkey => {
                        let device_verify = cipher.encrypt(&client_pubkey)?;
                        self.handshake = HandshakeState::Established(cipher);
                        SessionResponse1 {
                            status: STATUS_OK,
                            device_verify,
                        }
                        .to_bytes()
                    }
                    _ => SessionResponse1 {
                        status: 1,
                        device_verify: Vec::new(),
                    }
                    .to_bytes(),
                }
            }
            other => Err(Error::InvalidData {
                context: format!("unexpected session message {:?}", other),
            }),
        }
    }

    fn handle_scan(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let frame = Frame::parse(data)?;
        match frame.message_type {
            MessageType::ScanStart => ScanStartResponse {
                status: self.scan_status,
            }
            .to_bytes(),
            MessageType::ScanStatus => ScanStatusResponse {
                status: STATUS_OK,
                finished: self.scan_finishes,
                result_count: self.networks.len() as u16,
            }
            .to_bytes(),
            MessageType::ScanResult => {
                let request = ScanResult::from_bytes(data)?;
                let count = if self.oversized_pages {
                    usize::MAX
                } else {
                    request.count as usize
                };
                let entries = self
                    .networks
                    .iter()
                    .skip(request.start_index as usize)
                    .take(count)
                    .cloned()
                    .collect();
                ScanResultResponse {
                    status: STATUS_OK,
                    entries,
                }
                .to_bytes()
            }
            other => Err(Error::InvalidData {
                context: format!("unexpected scan message {:?}", other),
            }),
        }
    }

    fn handle_config(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let frame = Frame::parse(data)?;
        match frame.message_type {
            MessageType::SetConfig => {
                let config = SetConfig::from_bytes(data)?;
                self.credentials = Some((config.ssid, config.passphrase));
                SetConfigResponse { status: STATUS_OK }.to_bytes()
            }
            MessageType::ApplyConfig => ApplyConfigResponse { status: STATUS_OK }.to_bytes(),
            MessageType::GetStatus => {
                let state = self
                    .status_script
                    .pop_front()
                    .unwrap_or_else(|| self.last_status.clone());
                self.events.push(SimEvent::Status(state.clone()));
                GetStatusResponse {
                    status: STATUS_OK,
                    state,
                }
                .to_bytes()
            }
            other => Err(Error::InvalidData {
                context: format!("unexpected config message {:?}", other),
            }),
        }
    }

    fn session_cipher(&mut self) -> Result<&mut SessionCipher> {
        if matches!(self.handshake, HandshakeState::Idle) && !self.security.is_secure() {
            self.handshake = HandshakeState::Established(SessionCipher::passthrough());
        }
        match &mut self.handshake {
            HandshakeState::Established(cipher) => Ok(cipher),
            _ => Err(Error::Internal("session not established".to_string())),
        }
    }

    fn handle_write(&mut self, endpoint: &str, data: &[u8]) -> Result<()> {
        if endpoint == "prov-session" {
            let reply = self.handle_session(data)?;
            self.pending
                .entry(endpoint.to_string())
                .or_default()
                .push_back(reply);
            return Ok(());
        }

        let custom = self.endpoints.get(endpoint).cloned();
        if let Some(SimEndpoint::Fail(code)) = custom {
            return Err(Error::DeviceError { code });
        }
        if custom.is_none() && !matches!(endpoint, "prov-scan" | "prov-config") {
            return Err(Error::EndpointNotFound {
                endpoint: endpoint.to_string(),
            });
        }

        let request = self.session_cipher()?.decrypt(data)?;
        let reply = match (endpoint, custom) {
            ("prov-scan", _) => self.handle_scan(&request)?,
            ("prov-config", _) => self.handle_config(&request)?,
            (_, Some(SimEndpoint::Echo(prefix))) => {
                let mut reply = prefix;
                reply.extend_from_slice(&request);
                reply
            }
            _ => unreachable!("endpoint checked above"),
        };
        let sealed = self.session_cipher()?.encrypt(&reply)?;
        self.pending
            .entry(endpoint.to_string())
            .or_default()
            .push_back(sealed);
        Ok(())
    }
}

/// Client side of a connection to a [`SimDevice`].
pub struct SimLink {
    device: SimDevice,
}

impl SimLink {
    /// Open a link to `device`.
    pub fn new(device: SimDevice) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Link for SimLink {
    async fn write(&self, endpoint: &str, data: &[u8]) -> Result<()> {
        let mut state = self.device.state.lock();
        state.events.push(SimEvent::Write(endpoint.to_string()));
        state.writes.push((endpoint.to_string(), data.to_vec()));
        if state.disconnect_on.as_deref() == Some(endpoint) {
            return Err(Error::DisconnectedUnexpectedly);
        }
        state.handle_write(endpoint, data)
    }

    async fn read(&self, endpoint: &str) -> Result<Vec<u8>> {
        self.device
            .state
            .lock()
            .pending
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| Error::InvalidData {
                context: format!("no response pending on {}", endpoint),
            })
    }

    async fn close(&self) -> Result<()> {
        self.device.state.lock().events.push(SimEvent::Close);
        Ok(())
    }
}

/// A transport advertising simulated devices.
#[derive(Clone, Default)]
pub struct SimTransport {
    devices: Vec<SimDevice>,
    unavailable: bool,
    scan_window: Option<Duration>,
    scans: Arc<Mutex<usize>>,
}

impl SimTransport {
    /// Advertise `devices`, in order.
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// A transport without Bluetooth hardware.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Keep scans open for at most this long regardless of the requested timeout.
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = Some(window);
        self
    }

    /// Number of scans started.
    pub fn scan_count(&self) -> usize {
        *self.scans.lock()
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn scan(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<BoxStream<'static, DiscoveredDevice>> {
        if self.unavailable {
            return Err(Error::BluetoothUnavailable);
        }
        *self.scans.lock() += 1;

        let adverts: Vec<DiscoveredDevice> = self
            .devices
            .iter()
            .filter(|d| d.name.starts_with(prefix))
            .flat_map(|d| std::iter::repeat(d.advert()).take(d.adverts))
            .collect();
        let window = self.scan_window.map_or(timeout, |w| w.min(timeout));

        let (tx, rx) = mpsc::channel(adverts.len().max(1));
        tokio::spawn(async move {
            for advert in adverts {
                if tx.send(advert).await.is_err() {
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = tx.closed() => {}
            }
        });

        Ok(receiver_stream(rx))
    }

    async fn open(&self, device: &DiscoveredDevice) -> Result<Box<dyn Link>> {
        let sim = self
            .devices
            .iter()
            .find(|d| d.id == device.id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                name: device.name.clone(),
            })?;

        if sim.state.lock().fail_open {
            return Err(Error::ConnectionFailed {
                reason: "simulated refusal".to_string(),
            });
        }

        Ok(Box::new(SimLink::new(sim)))
    }
}

/// A device that joins the network after one `Connecting` poll.
pub fn joining_device(name: &str) -> SimDevice {
    SimDevice::new(name).with_status_script(vec![
        WifiStationState::Connecting,
        WifiStationState::Connected {
            ip: Ipv4Addr::new(192, 168, 4, 2),
        },
    ])
}
