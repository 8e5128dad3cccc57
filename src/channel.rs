//! Method-channel boundary.
//!
//! Host applications drive the [`Provisioner`] with named calls carrying a
//! flat JSON argument map, and get back exactly one reply per call. Streaming
//! operations are subscribed through [`MethodChannel::listen`].

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::ble::BtleplugTransport;
use crate::error::Error;
use crate::provisioner::Provisioner;
use crate::security::{ProofOfPossession, SecurityLevel};
use crate::stream::{StreamEvent, StreamHandle};
use crate::transport::Transport;

/// Name the channel is registered under.
pub const CHANNEL_NAME: &str = "esp_ble_prov";

/// List nearby devices.
pub const SCAN_BLE_DEVICES: &str = "scanBleDevices";
/// List SSIDs visible to a device.
pub const SCAN_WIFI_NETWORKS: &str = "scanWifiNetworks";
/// List networks visible to a device with signal and security.
pub const SCAN_WIFI_NETWORKS_WITH_DETAILS: &str = "scanWifiNetworksWithDetails";
/// Provision Wi-Fi credentials.
pub const PROVISION_WIFI: &str = "provisionWifi";
/// Exchange data with a custom endpoint.
pub const SEND_DATA_TO_CUSTOM_END_POINT: &str = "sendDataToCustomEndPoint";

/// Error code for a missing or malformed argument.
pub const E_INVALID_ARGUMENT: &str = "E_INVALID_ARGUMENT";
/// Error code for a failed custom endpoint exchange.
pub const E_SEND_DATA_FAILED: &str = "E_SEND_DATA_FAILED";
/// Error code for a device that dropped the connection.
pub const DEVICE_DISCONNECTED: &str = "DEVICE_DISCONNECTED";

/// A named call with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Method name.
    pub method: String,
    /// Flat argument map.
    pub arguments: Map<String, Value>,
}

impl MethodCall {
    /// Build a call. Non-object arguments are treated as empty.
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Error reply sent across the channel.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {}", .message.as_deref().unwrap_or("<no message>"))]
pub struct ChannelError {
    /// Error code, numeric codes stringified.
    pub code: String,
    /// Human readable description.
    pub message: Option<String>,
}

impl ChannelError {
    fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            code: E_INVALID_ARGUMENT.to_string(),
            message: Some(message.into()),
        }
    }
}

impl From<Error> for ChannelError {
    fn from(e: Error) -> Self {
        match e {
            Error::EndpointSendFailed { message, .. } => Self {
                code: E_SEND_DATA_FAILED.to_string(),
                message: Some(message),
            },
            Error::DisconnectedUnexpectedly => Self {
                code: DEVICE_DISCONNECTED.to_string(),
                message: None,
            },
            Error::InvalidParameter { .. } => Self::invalid_argument(e.to_string()),
            other => Self {
                code: other.code().to_string(),
                message: Some(other.to_string()),
            },
        }
    }
}

/// Outcome of a call: a JSON value or a channel error.
pub type Reply = std::result::Result<Value, ChannelError>;

/// Answers one call. Consumed on use, so a call is answered at most once.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Reply>,
}

impl Responder {
    /// Create a responder and the receiver its reply arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the reply. Returns `false` if the caller stopped waiting.
    pub fn send(self, reply: Reply) -> bool {
        self.tx.send(reply).is_ok()
    }
}

/// Dispatches method calls to a [`Provisioner`].
pub struct MethodChannel<T = BtleplugTransport> {
    provisioner: Provisioner<T>,
}

impl<T> Clone for MethodChannel<T> {
    fn clone(&self) -> Self {
        Self {
            provisioner: self.provisioner.clone(),
        }
    }
}

impl<T: Transport + 'static> MethodChannel<T> {
    /// Create a channel over a provisioner.
    pub fn new(provisioner: Provisioner<T>) -> Self {
        Self { provisioner }
    }

    /// Get the provisioner.
    pub fn provisioner(&self) -> &Provisioner<T> {
        &self.provisioner
    }

    /// Run `call` in the background and answer it through `responder`.
    pub fn dispatch(&self, call: MethodCall, responder: Responder) {
        let this = self.clone();
        tokio::spawn(async move {
            let reply = this.handle(&call).await;
            if !responder.send(reply) {
                debug!("Caller stopped waiting for {}", call.method);
            }
        });
    }

    /// Handle one call and produce its reply.
    pub async fn handle(&self, call: &MethodCall) -> Reply {
        let args = &call.arguments;
        let security = security_arg(args);
        debug!("Handling {} ({})", call.method, security);

        match call.method.as_str() {
            SCAN_BLE_DEVICES => {
                let prefix = str_arg(args, "prefix")?;
                let names = self.provisioner.list_devices(prefix, security).await?;
                Ok(json!(names))
            }
            SCAN_WIFI_NETWORKS => {
                let (device_name, pop) = device_args(args)?;
                let ssids = self
                    .provisioner
                    .list_wifi_networks(device_name, &pop, security)
                    .await?;
                Ok(json!(ssids))
            }
            SCAN_WIFI_NETWORKS_WITH_DETAILS => {
                let (device_name, pop) = device_args(args)?;
                let networks = self
                    .provisioner
                    .list_wifi_networks_detailed(device_name, &pop, security)
                    .await?;
                let networks: Vec<Value> = networks
                    .into_iter()
                    .map(|n| {
                        json!({
                            "ssid": n.ssid,
                            "rssi": n.rssi,
                            "security": n.auth.code(),
                        })
                    })
                    .collect();
                Ok(Value::Array(networks))
            }
            PROVISION_WIFI => {
                let (device_name, pop) = device_args(args)?;
                let ssid = str_arg(args, "ssid")?;
                let passphrase = str_arg(args, "passphrase")?;
                let outcome = self
                    .provisioner
                    .apply_wifi_credentials(device_name, &pop, ssid, passphrase, security)
                    .await?;
                Ok(Value::Bool(outcome.is_success()))
            }
            SEND_DATA_TO_CUSTOM_END_POINT => {
                let (device_name, pop) = device_args(args)?;
                let path = str_arg(args, "path")?;
                let data = bytes_arg(args, "data")?;
                let reply = self
                    .provisioner
                    .send_application_data(device_name, &pop, path, &data, security)
                    .await?;
                Ok(json!(reply))
            }
            _ => Ok(Value::String(platform_version())),
        }
    }

    /// Subscribe to a streaming operation.
    ///
    /// `arguments.channel` selects `ble` (device names) or `wifi` (networks
    /// as `{ssid, rssi}`), defaulting to `wifi`. Events are forwarded to
    /// `sink` until the returned handle is stopped or the stream completes.
    pub fn listen(
        &self,
        arguments: &Map<String, Value>,
        sink: mpsc::Sender<Reply>,
    ) -> std::result::Result<StreamHandle, ChannelError> {
        let channel = arguments
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("wifi");
        let capacity = self.provisioner.config().event_capacity;
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let handle = match channel {
            "ble" => {
                let prefix = arguments
                    .get("prefix")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.provisioner.start_device_discovery(prefix, events_tx)
            }
            "wifi" => {
                let (device_name, pop) = device_args(arguments)?;
                self.provisioner.start_wifi_scan(
                    device_name,
                    &pop,
                    security_arg(arguments),
                    events_tx,
                )
            }
            other => {
                return Err(ChannelError::invalid_argument(format!(
                    "unknown event channel {:?}",
                    other
                )))
            }
        };

        tokio::spawn(forward_events(events_rx, sink));
        Ok(handle)
    }
}

async fn forward_events(mut events: mpsc::Receiver<StreamEvent>, sink: mpsc::Sender<Reply>) {
    while let Some(event) = events.recv().await {
        let item = match event {
            StreamEvent::Device(name) => Ok(Value::String(name)),
            StreamEvent::Network { ssid, rssi } => Ok(json!({ "ssid": ssid, "rssi": rssi })),
            StreamEvent::Error(e) => Err(ChannelError::from(e)),
        };
        if sink.send(item).await.is_err() {
            warn!("Event sink closed, dropping stream events");
            break;
        }
    }
}

fn platform_version() -> String {
    format!("Rust {}", env!("CARGO_PKG_VERSION"))
}

fn security_arg(args: &Map<String, Value>) -> SecurityLevel {
    SecurityLevel::from_option(args.get("security").and_then(Value::as_str))
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> std::result::Result<&'a str, ChannelError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ChannelError::invalid_argument(format!("missing string argument {:?}", key)))
}

fn device_args(
    args: &Map<String, Value>,
) -> std::result::Result<(&str, ProofOfPossession), ChannelError> {
    let device_name = str_arg(args, "deviceName")?;
    let pop = ProofOfPossession::from(str_arg(args, "proofOfPossession")?);
    Ok((device_name, pop))
}

fn bytes_arg(args: &Map<String, Value>, key: &str) -> std::result::Result<Vec<u8>, ChannelError> {
    let items = args
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ChannelError::invalid_argument(format!("missing byte array {:?}", key)))?;

    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| {
                    ChannelError::invalid_argument(format!("{:?} holds a non-byte value {}", key, item))
                })
        })
        .collect()
}
