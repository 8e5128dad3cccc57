//! Session payload encryption.
//!
//! Secure sessions seal every payload with ChaCha20-Poly1305. Nonces are
//! `direction(1) + device_random[..3] + counter(8, BE)`, with an independent
//! counter per direction, so a replayed or reordered frame fails to open.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Handshake error code for payloads that fail to seal or open.
pub const CODE_CRYPTO: i32 = 14;

const DIR_CLIENT_TO_DEVICE: u8 = 0x01;
const DIR_DEVICE_TO_CLIENT: u8 = 0x02;

/// Which end of the session this cipher belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The provisioning client.
    Client,
    /// The device being provisioned.
    Device,
}

struct Sealer {
    aead: ChaCha20Poly1305,
    salt: [u8; 3],
    tx_dir: u8,
    rx_dir: u8,
    tx_counter: u64,
    rx_counter: u64,
}

impl Sealer {
    fn nonce(&self, dir: u8, counter: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[0] = dir;
        nonce[1..4].copy_from_slice(&self.salt);
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }
}

/// Encrypts outgoing and decrypts incoming session payloads.
pub struct SessionCipher {
    sealer: Option<Sealer>,
}

impl SessionCipher {
    /// A cipher that passes payloads through unchanged.
    pub fn passthrough() -> Self {
        Self { sealer: None }
    }

    /// A cipher keyed with a derived session key.
    pub fn new(mut key: [u8; 32], device_random: &[u8; 16], role: Role) -> Self {
        let aead = ChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        let (tx_dir, rx_dir) = match role {
            Role::Client => (DIR_CLIENT_TO_DEVICE, DIR_DEVICE_TO_CLIENT),
            Role::Device => (DIR_DEVICE_TO_CLIENT, DIR_CLIENT_TO_DEVICE),
        };

        let mut salt = [0u8; 3];
        salt.copy_from_slice(&device_random[..3]);

        Self {
            sealer: Some(Sealer {
                aead,
                salt,
                tx_dir,
                rx_dir,
                tx_counter: 0,
                rx_counter: 0,
            }),
        }
    }

    /// Whether payloads are actually encrypted.
    pub fn is_secure(&self) -> bool {
        self.sealer.is_some()
    }

    /// Seal an outgoing payload.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let Some(sealer) = self.sealer.as_mut() else {
            return Ok(plaintext.to_vec());
        };

        let nonce = sealer.nonce(sealer.tx_dir, sealer.tx_counter);
        let sealed = sealer
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::HandshakeFailed {
                code: CODE_CRYPTO,
                message: "failed to encrypt payload".to_string(),
            })?;
        sealer.tx_counter += 1;
        Ok(sealed)
    }

    /// Open an incoming payload.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let Some(sealer) = self.sealer.as_mut() else {
            return Ok(ciphertext.to_vec());
        };

        let nonce = sealer.nonce(sealer.rx_dir, sealer.rx_counter);
        let opened = sealer
            .aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::HandshakeFailed {
                code: CODE_CRYPTO,
                message: "failed to decrypt payload".to_string(),
            })?;
        sealer.rx_counter += 1;
        Ok(opened)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("secure", &self.is_secure())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SessionCipher, SessionCipher) {
        let random = [9u8; 16];
        (
            SessionCipher::new([3u8; 32], &random, Role::Client),
            SessionCipher::new([3u8; 32], &random, Role::Device),
        )
    }

    #[test]
    fn test_passthrough() {
        let mut cipher = SessionCipher::passthrough();
        assert!(!cipher.is_secure());
        assert_eq!(cipher.encrypt(b"abc").unwrap(), b"abc");
        assert_eq!(cipher.decrypt(b"abc").unwrap(), b"abc");
    }

    #[test]
    fn test_both_directions() {
        let (mut client, mut device) = pair();

        let sealed = client.encrypt(b"hello device").unwrap();
        assert_ne!(sealed, b"hello device");
        assert_eq!(device.decrypt(&sealed).unwrap(), b"hello device");

        let reply = device.encrypt(b"hello client").unwrap();
        assert_eq!(client.decrypt(&reply).unwrap(), b"hello client");
    }

    #[test]
    fn test_replay_rejected() {
        let (mut client, mut device) = pair();

        let sealed = client.encrypt(b"once").unwrap();
        device.decrypt(&sealed).unwrap();
        assert!(device.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_reflection_rejected() {
        let (mut client, _device) = pair();

        let sealed = client.encrypt(b"echo").unwrap();
        assert!(client.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let random = [0u8; 16];
        let mut client = SessionCipher::new([1u8; 32], &random, Role::Client);
        let mut device = SessionCipher::new([2u8; 32], &random, Role::Device);

        let sealed = client.encrypt(b"secret").unwrap();
        assert!(device.decrypt(&sealed).is_err());
    }
}
