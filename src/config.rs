//! Provisioning configuration.
//!
//! Timeouts, polling budgets and protocol parameters used by the
//! [`Provisioner`](crate::Provisioner). All values have sensible defaults
//! and can be overridden with the `with_*` builder methods.

use std::time::Duration;

/// Default username mixed into the Secure2 key derivation.
pub const DEFAULT_SEC2_USERNAME: &str = "wifiprov";

/// Parameters of a device-side Wi-Fi scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WifiScanParams {
    /// Whether the device should block until the scan finishes.
    pub blocking: bool,
    /// Passive scan instead of sending probe requests.
    pub passive: bool,
    /// Number of channels scanned per group (0 scans all at once).
    pub group_channels: u8,
    /// Dwell time per channel in milliseconds.
    pub period_ms: u32,
}

impl Default for WifiScanParams {
    fn default() -> Self {
        Self {
            blocking: true,
            passive: false,
            group_channels: 5,
            period_ms: 120,
        }
    }
}

/// Configuration for a [`Provisioner`](crate::Provisioner).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProvisionConfig {
    /// How long a discovery scan runs before it completes.
    pub scan_timeout: Duration,
    /// Upper bound for opening a connection to a device.
    pub connect_timeout: Duration,
    /// Upper bound for a single request/response exchange.
    pub response_timeout: Duration,
    /// Delay between Wi-Fi status polls after credentials are applied.
    pub status_poll_interval: Duration,
    /// Maximum number of status polls before provisioning is reported failed.
    pub max_status_polls: u32,
    /// Device-side Wi-Fi scan parameters.
    pub wifi_scan: WifiScanParams,
    /// Username for Secure2 sessions.
    pub sec2_username: String,
    /// Capacity of internal event channels.
    pub event_capacity: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            response_timeout: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(1),
            max_status_polls: 30,
            wifi_scan: WifiScanParams::default(),
            sec2_username: DEFAULT_SEC2_USERNAME.to_string(),
            event_capacity: 32,
        }
    }
}

impl ProvisionConfig {
    /// Set the discovery scan window.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the status polling cadence and budget.
    pub fn with_status_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.status_poll_interval = interval;
        self.max_status_polls = max_polls;
        self
    }

    /// Set the device-side Wi-Fi scan parameters.
    pub fn with_wifi_scan(mut self, params: WifiScanParams) -> Self {
        self.wifi_scan = params;
        self
    }

    /// Set the Secure2 username.
    pub fn with_sec2_username(mut self, username: impl Into<String>) -> Self {
        self.sec2_username = username.into();
        self
    }

    /// Set the capacity of internal event channels (minimum 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
