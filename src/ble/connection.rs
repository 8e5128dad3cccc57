//! BLE connection management.
//!
//! Handles connecting to and disconnecting from one provisioning peripheral.
//! Provisioning sessions are short lived, so a lost connection is reported
//! rather than re-established. A manager dropped while still connected
//! disconnects in the background.

use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Connection state for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and services discovered.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Manages the connection to one peripheral.
pub struct ConnectionManager {
    peripheral: Peripheral,
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Connect and discover services. A single attempt is made.
    pub async fn connect(&self) -> Result<()> {
        let current_state = self.state();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        self.set_state(ConnectionState::Connecting);

        if !self.peripheral.is_connected().await.unwrap_or(false) {
            if let Err(e) = self.peripheral.connect().await {
                self.set_state(ConnectionState::Disconnected);
                return Err(Error::ConnectionFailed {
                    reason: e.to_string(),
                });
            }
        }

        if let Err(e) = self.peripheral.discover_services().await {
            self.set_state(ConnectionState::Disconnected);
            let _ = self.peripheral.disconnect().await;
            return Err(Error::ConnectionFailed {
                reason: format!("Service discovery failed: {}", e),
            });
        }

        info!("Connected to {}", self.identifier());
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Disconnect from the peripheral. Disconnecting twice is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();

        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        match self.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from {}", self.identifier());
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(Error::Bluetooth(e))
            }
        }
    }

    /// Ask the platform whether the link is still up, updating the cached state.
    pub async fn refresh(&self) -> ConnectionState {
        let alive = self.peripheral.is_connected().await.unwrap_or(false);
        if !alive && self.is_connected() {
            debug!("Link to {} dropped", self.identifier());
            self.set_state(ConnectionState::Disconnected);
        }
        self.state()
    }

    fn identifier(&self) -> String {
        self.peripheral.id().to_string()
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Dropped connection to {} outside a runtime", self.identifier());
            return;
        };

        debug!("Disconnecting dropped connection to {}", self.identifier());
        let peripheral = self.peripheral.clone();
        runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Background disconnect failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connecting), "Connecting");
        assert_eq!(format!("{}", ConnectionState::Disconnecting), "Disconnecting");
    }
}
