//! Wi-Fi related data types.

use std::fmt;
use std::net::Ipv4Addr;

/// Authentication mode of a Wi-Fi network.
///
/// The numeric codes match the values reported on the wire and at the
/// method channel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WifiAuthMode {
    /// Open network.
    Open,
    /// WEP.
    Wep,
    /// WPA personal.
    WpaPsk,
    /// WPA2 personal.
    Wpa2Psk,
    /// Mixed WPA/WPA2 personal.
    WpaWpa2Psk,
    /// WPA2 enterprise.
    Wpa2Enterprise,
    /// WPA3 personal.
    Wpa3Psk,
    /// Mixed WPA2/WPA3 personal.
    Wpa2Wpa3Psk,
    /// A mode this crate does not know about.
    Unknown(u8),
}

impl WifiAuthMode {
    /// Create from the raw wire code.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Wep,
            2 => Self::WpaPsk,
            3 => Self::Wpa2Psk,
            4 => Self::WpaWpa2Psk,
            5 => Self::Wpa2Enterprise,
            6 => Self::Wpa3Psk,
            7 => Self::Wpa2Wpa3Psk,
            other => Self::Unknown(other),
        }
    }

    /// The raw wire code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Wep => 1,
            Self::WpaPsk => 2,
            Self::Wpa2Psk => 3,
            Self::WpaWpa2Psk => 4,
            Self::Wpa2Enterprise => 5,
            Self::Wpa3Psk => 6,
            Self::Wpa2Wpa3Psk => 7,
            Self::Unknown(code) => *code,
        }
    }

    /// Whether joining requires a passphrase.
    pub fn requires_passphrase(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for WifiAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Wep => write!(f, "WEP"),
            Self::WpaPsk => write!(f, "WPA-PSK"),
            Self::Wpa2Psk => write!(f, "WPA2-PSK"),
            Self::WpaWpa2Psk => write!(f, "WPA/WPA2-PSK"),
            Self::Wpa2Enterprise => write!(f, "WPA2-Enterprise"),
            Self::Wpa3Psk => write!(f, "WPA3-PSK"),
            Self::Wpa2Wpa3Psk => write!(f, "WPA2/WPA3-PSK"),
            Self::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// A Wi-Fi network seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WifiNetwork {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Primary channel.
    pub channel: u8,
    /// Access point MAC address.
    pub bssid: [u8; 6],
    /// Authentication mode.
    pub auth: WifiAuthMode,
}

impl WifiNetwork {
    /// Create a network entry with an unknown channel and BSSID.
    pub fn new(ssid: impl Into<String>, rssi: i16, auth: WifiAuthMode) -> Self {
        Self {
            ssid: ssid.into(),
            rssi,
            channel: 0,
            bssid: [0; 6],
            auth,
        }
    }

    /// BSSID formatted as `aa:bb:cc:dd:ee:ff`.
    pub fn bssid_string(&self) -> String {
        self.bssid
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Why a provisioning attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
    /// The access point rejected the passphrase.
    AuthError,
    /// The requested network could not be found.
    NetworkNotFound,
    /// Any other failure.
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthError => write!(f, "authentication error"),
            Self::NetworkNotFound => write!(f, "network not found"),
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Outcome notifications of a provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProvisioningOutcome {
    /// Credentials were accepted and applied; the device is now joining.
    ConfigApplied,
    /// The device joined the network.
    Success,
    /// The device could not join the network.
    Failure(FailureReason),
}

impl ProvisioningOutcome {
    /// Whether this outcome ends the attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ConfigApplied)
    }

    /// Whether this is a successful terminal outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Station state reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiStationState {
    /// Joined, with the address obtained by the device.
    Connected {
        /// IPv4 address of the device.
        ip: Ipv4Addr,
    },
    /// Joining is in progress.
    Connecting,
    /// Not connected and not trying.
    Disconnected,
    /// Joining failed.
    ConnectionFailed(FailureReason),
}

impl WifiStationState {
    /// Map a polled state to the outcome it implies, if any.
    pub fn outcome(&self) -> Option<ProvisioningOutcome> {
        match self {
            Self::Connected { .. } => Some(ProvisioningOutcome::Success),
            Self::ConnectionFailed(reason) => Some(ProvisioningOutcome::Failure(reason.clone())),
            Self::Disconnected => Some(ProvisioningOutcome::Failure(FailureReason::Other(
                "device disconnected from access point".to_string(),
            ))),
            Self::Connecting => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_codes() {
        for code in 0..=7u8 {
            assert_eq!(WifiAuthMode::from_raw(code).code(), code);
        }
        assert_eq!(WifiAuthMode::from_raw(42), WifiAuthMode::Unknown(42));
        assert_eq!(WifiAuthMode::Wpa2Psk.code(), 3);
        assert!(!WifiAuthMode::Open.requires_passphrase());
        assert_eq!(WifiAuthMode::Wpa2Enterprise.to_string(), "WPA2-Enterprise");
    }

    #[test]
    fn test_outcome_terminality() {
        assert!(!ProvisioningOutcome::ConfigApplied.is_terminal());
        assert!(ProvisioningOutcome::Success.is_terminal());
        assert!(ProvisioningOutcome::Failure(FailureReason::AuthError).is_terminal());
        assert!(!ProvisioningOutcome::Failure(FailureReason::AuthError).is_success());
    }

    #[test]
    fn test_station_state_outcome() {
        assert_eq!(WifiStationState::Connecting.outcome(), None);
        assert_eq!(
            WifiStationState::Connected {
                ip: Ipv4Addr::new(192, 168, 1, 20)
            }
            .outcome(),
            Some(ProvisioningOutcome::Success)
        );
        assert_eq!(
            WifiStationState::ConnectionFailed(FailureReason::NetworkNotFound).outcome(),
            Some(ProvisioningOutcome::Failure(FailureReason::NetworkNotFound))
        );
    }

    #[test]
    fn test_bssid_string() {
        let mut network = WifiNetwork::new("A", -40, WifiAuthMode::Wpa2Psk);
        network.bssid = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];
        assert_eq!(network.bssid_string(), "de:ad:be:ef:00:01");
    }
}
