//! Wi-Fi scan and configuration messages.
//!
//! Scan messages travel on `prov-scan`, configuration messages on
//! `prov-config`. Every response starts with a status byte.

use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

use crate::config::WifiScanParams;
use crate::data::wifi::{FailureReason, WifiAuthMode, WifiNetwork, WifiStationState};
use crate::error::{Error, Result};
use crate::protocol::frame::{put_string, MessageType, PayloadReader, WireMessage};

/// Maximum number of scan results returned per page.
pub const MAX_RESULTS_PER_PAGE: u8 = 4;

/// Status byte for a successful request.
pub const STATUS_OK: u8 = 0;

/// Turn a non-zero response status into a device error.
pub fn check_status(status: u8) -> Result<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(Error::DeviceError { code: status })
    }
}

/// Start a Wi-Fi scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStart {
    /// Scan parameters.
    pub params: WifiScanParams,
}

impl WireMessage for ScanStart {
    const TYPE: MessageType = MessageType::ScanStart;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.params.blocking as u8);
        buf.put_u8(self.params.passive as u8);
        buf.put_u8(self.params.group_channels);
        buf.put_u32_le(self.params.period_ms);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            params: WifiScanParams {
                blocking: reader.bool("blocking")?,
                passive: reader.bool("passive")?,
                group_channels: reader.u8("group channels")?,
                period_ms: reader.u32("period")?,
            },
        })
    }
}

/// Response carrying only a status byte.
macro_rules! status_response {
    ($(#[$doc:meta])* $name:ident, $ty:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            /// Status, [`STATUS_OK`] on success.
            pub status: u8,
        }

        impl WireMessage for $name {
            const TYPE: MessageType = $ty;

            fn encode_payload(&self, buf: &mut BytesMut) {
                buf.put_u8(self.status);
            }

            fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
                Ok(Self {
                    status: reader.u8("status")?,
                })
            }
        }
    };
}

/// Request carrying no payload.
macro_rules! empty_request {
    ($(#[$doc:meta])* $name:ident, $ty:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl WireMessage for $name {
            const TYPE: MessageType = $ty;

            fn encode_payload(&self, _buf: &mut BytesMut) {}

            fn decode_payload(_reader: &mut PayloadReader) -> Result<Self> {
                Ok(Self)
            }
        }
    };
}

status_response!(
    /// Response to [`ScanStart`].
    ScanStartResponse,
    MessageType::ScanStartResponse
);
status_response!(
    /// Response to [`SetConfig`].
    SetConfigResponse,
    MessageType::SetConfigResponse
);
status_response!(
    /// Response to [`ApplyConfig`].
    ApplyConfigResponse,
    MessageType::ApplyConfigResponse
);

empty_request!(
    /// Query scan progress.
    ScanStatus,
    MessageType::ScanStatus
);
empty_request!(
    /// Query the station state.
    GetStatus,
    MessageType::GetStatus
);
empty_request!(
    /// Apply the credentials sent with [`SetConfig`].
    ApplyConfig,
    MessageType::ApplyConfig
);

/// Scan progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatusResponse {
    /// Status, [`STATUS_OK`] on success.
    pub status: u8,
    /// Whether the scan has finished.
    pub finished: bool,
    /// Number of networks found so far.
    pub result_count: u16,
}

impl WireMessage for ScanStatusResponse {
    const TYPE: MessageType = MessageType::ScanStatusResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_u8(self.finished as u8);
        buf.put_u16_le(self.result_count);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            status: reader.u8("status")?,
            finished: reader.bool("finished")?,
            result_count: reader.u16("result count")?,
        })
    }
}

/// Fetch a page of scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    /// Index of the first entry.
    pub start_index: u16,
    /// Number of entries, at most [`MAX_RESULTS_PER_PAGE`].
    pub count: u8,
}

impl WireMessage for ScanResult {
    const TYPE: MessageType = MessageType::ScanResult;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.start_index);
        buf.put_u8(self.count);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            start_index: reader.u16("start index")?,
            count: reader.u8("count")?,
        })
    }
}

/// A page of scan results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResultResponse {
    /// Status, [`STATUS_OK`] on success.
    pub status: u8,
    /// Networks in this page.
    pub entries: Vec<WifiNetwork>,
}

impl WireMessage for ScanResultResponse {
    const TYPE: MessageType = MessageType::ScanResultResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_u8(self.entries.len().min(u8::MAX as usize) as u8);
        for entry in self.entries.iter().take(u8::MAX as usize) {
            put_string(buf, &entry.ssid);
            buf.put_u8(entry.channel);
            buf.put_i8(entry.rssi.clamp(i8::MIN as i16, i8::MAX as i16) as i8);
            buf.put_slice(&entry.bssid);
            buf.put_u8(entry.auth.code());
        }
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        let status = reader.u8("status")?;
        let count = reader.u8("entry count")?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let ssid = reader.string("ssid")?;
            let channel = reader.u8("channel")?;
            let rssi = i16::from(reader.i8("rssi")?);
            let bssid = reader.array::<6>("bssid")?;
            let auth = WifiAuthMode::from_raw(reader.u8("auth mode")?);
            entries.push(WifiNetwork {
                ssid,
                rssi,
                channel,
                bssid,
                auth,
            });
        }
        Ok(Self { status, entries })
    }
}

/// Send Wi-Fi credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SetConfig {
    /// Network name.
    pub ssid: String,
    /// Network passphrase.
    pub passphrase: String,
}

impl std::fmt::Debug for SetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetConfig")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl WireMessage for SetConfig {
    const TYPE: MessageType = MessageType::SetConfig;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_string(buf, &self.ssid);
        put_string(buf, &self.passphrase);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            ssid: reader.string("ssid")?,
            passphrase: reader.string("passphrase")?,
        })
    }
}

const STATE_CONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_DISCONNECTED: u8 = 2;
const STATE_FAILED: u8 = 3;

const FAIL_AUTH: u8 = 0;
const FAIL_NOT_FOUND: u8 = 1;

/// Station state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStatusResponse {
    /// Status, [`STATUS_OK`] on success.
    pub status: u8,
    /// Current station state.
    pub state: WifiStationState,
}

impl WireMessage for GetStatusResponse {
    const TYPE: MessageType = MessageType::GetStatusResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        match &self.state {
            WifiStationState::Connected { ip } => {
                buf.put_u8(STATE_CONNECTED);
                buf.put_slice(&ip.octets());
            }
            WifiStationState::Connecting => buf.put_u8(STATE_CONNECTING),
            WifiStationState::Disconnected => buf.put_u8(STATE_DISCONNECTED),
            WifiStationState::ConnectionFailed(reason) => {
                buf.put_u8(STATE_FAILED);
                match reason {
                    FailureReason::AuthError => buf.put_u8(FAIL_AUTH),
                    FailureReason::NetworkNotFound => buf.put_u8(FAIL_NOT_FOUND),
                    FailureReason::Other(detail) => {
                        buf.put_u8(0xFF);
                        put_string(buf, detail);
                    }
                }
            }
        }
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        let status = reader.u8("status")?;
        let state = match reader.u8("station state")? {
            STATE_CONNECTED => WifiStationState::Connected {
                ip: Ipv4Addr::from(reader.array::<4>("ip address")?),
            },
            STATE_CONNECTING => WifiStationState::Connecting,
            STATE_DISCONNECTED => WifiStationState::Disconnected,
            STATE_FAILED => {
                let reason = match reader.u8("failure reason")? {
                    FAIL_AUTH => FailureReason::AuthError,
                    FAIL_NOT_FOUND => FailureReason::NetworkNotFound,
                    _ => FailureReason::Other(reader.string("failure detail")?),
                };
                WifiStationState::ConnectionFailed(reason)
            }
            other => {
                return Err(Error::InvalidData {
                    context: format!("Unknown station state {}", other),
                })
            }
        };
        Ok(Self { status, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scan_result_page() {
        let msg = ScanResultResponse {
            status: STATUS_OK,
            entries: vec![
                WifiNetwork {
                    ssid: "Home".to_string(),
                    rssi: -40,
                    channel: 6,
                    bssid: [1, 2, 3, 4, 5, 6],
                    auth: WifiAuthMode::Wpa2Psk,
                },
                WifiNetwork::new("Cafe", -81, WifiAuthMode::Open),
            ],
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(ScanResultResponse::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_station_failure_reasons() {
        for state in [
            WifiStationState::ConnectionFailed(FailureReason::AuthError),
            WifiStationState::ConnectionFailed(FailureReason::Other("dhcp".to_string())),
            WifiStationState::Connected {
                ip: Ipv4Addr::new(10, 0, 0, 7),
            },
        ] {
            let msg = GetStatusResponse {
                status: STATUS_OK,
                state,
            };
            let bytes = msg.to_bytes().unwrap();
            assert_eq!(GetStatusResponse::from_bytes(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_unknown_station_state() {
        let bytes = crate::protocol::frame::Frame::new(
            MessageType::GetStatusResponse,
            vec![STATUS_OK, 9],
        )
        .to_bytes()
        .unwrap();
        assert!(GetStatusResponse::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_set_config_debug_redacts_passphrase() {
        let msg = SetConfig {
            ssid: "Home".to_string(),
            passphrase: "hunter22".to_string(),
        };
        assert!(!format!("{:?}", msg).contains("hunter22"));
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(STATUS_OK).is_ok());
        assert!(matches!(check_status(2), Err(Error::DeviceError { code: 2 })));
    }
}
