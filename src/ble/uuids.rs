//! BLE Service and Characteristic UUIDs.
//!
//! ESP provisioning firmware exposes one primary service. Each endpoint is a
//! characteristic whose UUID is the service UUID with bytes 2..4 replaced by
//! a 16-bit short id, and whose user description descriptor carries the
//! endpoint name.

use uuid::Uuid;

/// Default ESP provisioning service UUID.
pub const PROV_SERVICE_UUID: Uuid = Uuid::from_u128(0x021a_9004_0382_4aea_bff4_6b3f1c5adfb4);

/// Characteristic User Description descriptor UUID (0x2901).
pub const USER_DESCRIPTION_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x0000_2901_0000_1000_8000_00805f9b34fb);

/// Short id of the Wi-Fi scan endpoint.
pub const PROV_SCAN_SHORT_ID: u16 = 0xff50;
/// Short id of the session endpoint.
pub const PROV_SESSION_SHORT_ID: u16 = 0xff51;
/// Short id of the Wi-Fi config endpoint.
pub const PROV_CONFIG_SHORT_ID: u16 = 0xff52;
/// Short id of the version endpoint.
pub const PROTO_VER_SHORT_ID: u16 = 0xff53;
/// Short id conventionally given to the first custom endpoint.
pub const CUSTOM_DATA_SHORT_ID: u16 = 0xff54;

/// Endpoints every provisioning service is expected to carry.
pub const DEFAULT_ENDPOINTS: [(&str, u16); 4] = [
    ("prov-scan", PROV_SCAN_SHORT_ID),
    ("prov-session", PROV_SESSION_SHORT_ID),
    ("prov-config", PROV_CONFIG_SHORT_ID),
    ("proto-ver", PROTO_VER_SHORT_ID),
];

/// Build the characteristic UUID for `short_id` within `service`.
pub const fn endpoint_uuid(service: Uuid, short_id: u16) -> Uuid {
    let mut bytes = *service.as_bytes();
    let short = short_id.to_be_bytes();
    bytes[2] = short[0];
    bytes[3] = short[1];
    Uuid::from_bytes(bytes)
}

/// Extract the short id of a characteristic belonging to `service`.
///
/// Returns `None` when `uuid` differs from `service` outside bytes 2..4.
pub fn short_id(service: &Uuid, uuid: &Uuid) -> Option<u16> {
    let s = service.as_bytes();
    let u = uuid.as_bytes();
    if s[..2] != u[..2] || s[4..] != u[4..] {
        return None;
    }
    Some(u16::from_be_bytes([u[2], u[3]]))
}

/// Endpoint name conventionally bound to a short id.
pub fn default_endpoint_name(short_id: u16) -> Option<&'static str> {
    DEFAULT_ENDPOINTS
        .iter()
        .find(|(_, id)| *id == short_id)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uuid() {
        let session = endpoint_uuid(PROV_SERVICE_UUID, PROV_SESSION_SHORT_ID);
        assert_eq!(session.to_string(), "021aff51-0382-4aea-bff4-6b3f1c5adfb4");
    }

    #[test]
    fn test_short_id() {
        let config = endpoint_uuid(PROV_SERVICE_UUID, PROV_CONFIG_SHORT_ID);
        assert_eq!(short_id(&PROV_SERVICE_UUID, &config), Some(0xff52));
        assert_eq!(
            short_id(&PROV_SERVICE_UUID, &USER_DESCRIPTION_DESCRIPTOR_UUID),
            None
        );
    }

    #[test]
    fn test_default_endpoint_name() {
        assert_eq!(default_endpoint_name(0xff50), Some("prov-scan"));
        assert_eq!(default_endpoint_name(0xff53), Some("proto-ver"));
        assert_eq!(default_endpoint_name(CUSTOM_DATA_SHORT_ID), None);
    }
}
