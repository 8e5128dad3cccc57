//! Session establishment messages.
//!
//! Exchanged on the `prov-session` endpoint before any encrypted traffic:
//! - `SessionCommand0`: client public key (and Secure2 username)
//! - `SessionResponse0`: device public key, device random (and Secure2 salt)
//! - `SessionCommand1`: client verifier
//! - `SessionResponse1`: device verifier

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::frame::{put_bytes, put_string, MessageType, PayloadReader, WireMessage};

/// Length of an X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of the device random and Secure2 salt.
pub const RANDOM_LEN: usize = 16;

/// Status byte for a successful session step.
pub const STATUS_OK: u8 = 0;

/// First client handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCommand0 {
    /// Client ephemeral public key.
    pub client_pubkey: [u8; PUBLIC_KEY_LEN],
    /// Secure2 username, absent for Secure1.
    pub username: Option<String>,
}

impl WireMessage for SessionCommand0 {
    const TYPE: MessageType = MessageType::SessionCommand0;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.client_pubkey);
        match &self.username {
            Some(username) => {
                buf.put_u8(1);
                put_string(buf, username);
            }
            None => buf.put_u8(0),
        }
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        let client_pubkey = reader.array::<PUBLIC_KEY_LEN>("client public key")?;
        let username = if reader.bool("username flag")? {
            Some(reader.string("username")?)
        } else {
            None
        };
        Ok(Self {
            client_pubkey,
            username,
        })
    }
}

/// First device handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse0 {
    /// Status, [`STATUS_OK`] on success.
    pub status: u8,
    /// Device ephemeral public key.
    pub device_pubkey: [u8; PUBLIC_KEY_LEN],
    /// Device random, mixed into nonces.
    pub device_random: [u8; RANDOM_LEN],
    /// Secure2 salt, absent for Secure1.
    pub salt: Option<[u8; RANDOM_LEN]>,
}

impl WireMessage for SessionResponse0 {
    const TYPE: MessageType = MessageType::SessionResponse0;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_slice(&self.device_pubkey);
        buf.put_slice(&self.device_random);
        match &self.salt {
            Some(salt) => {
                buf.put_u8(1);
                buf.put_slice(salt);
            }
            None => buf.put_u8(0),
        }
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        let status = reader.u8("status")?;
        let device_pubkey = reader.array::<PUBLIC_KEY_LEN>("device public key")?;
        let device_random = reader.array::<RANDOM_LEN>("device random")?;
        let salt = if reader.bool("salt flag")? {
            Some(reader.array::<RANDOM_LEN>("salt")?)
        } else {
            None
        };
        Ok(Self {
            status,
            device_pubkey,
            device_random,
            salt,
        })
    }
}

/// Second client handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCommand1 {
    /// Device public key sealed with the session key.
    pub client_verify: Vec<u8>,
}

impl WireMessage for SessionCommand1 {
    const TYPE: MessageType = MessageType::SessionCommand1;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.client_verify);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            client_verify: reader.bytes("client verify")?,
        })
    }
}

/// Second device handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse1 {
    /// Status, [`STATUS_OK`] on success.
    pub status: u8,
    /// Client public key sealed with the session key.
    pub device_verify: Vec<u8>,
}

impl WireMessage for SessionResponse1 {
    const TYPE: MessageType = MessageType::SessionResponse1;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        put_bytes(buf, &self.device_verify);
    }

    fn decode_payload(reader: &mut PayloadReader) -> Result<Self> {
        Ok(Self {
            status: reader.u8("status")?,
            device_verify: reader.bytes("device verify")?,
        })
    }
}

/// Turn a non-zero session status into a handshake error.
pub fn check_status(step: &str, status: u8) -> Result<()> {
    if status == STATUS_OK {
        return Ok(());
    }
    Err(Error::HandshakeFailed {
        code: i32::from(status),
        message: format!("{} rejected by device", step),
    })
}
