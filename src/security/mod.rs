//! Secure session layer.
//!
//! Turns an open [`Link`] into a [`SecureSession`] by running the handshake
//! selected by a [`SecurityLevel`]:
//!
//! - **Unsecured**: no handshake, payloads pass through unchanged.
//! - **Secure1**: X25519 exchange, `key = SHA-256(shared) ^ SHA-256(pop)`.
//! - **Secure2**: X25519 exchange with a device salt,
//!   `key = SHA-256(shared || salt || SHA-256(username ":" pop))`.
//!
//! Both secure levels finish with a mutual proof: the client seals the
//! device's public key, the device seals the client's.

pub mod cipher;

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::protocol::frame::WireMessage;
use crate::protocol::session::{
    check_status, SessionCommand0, SessionCommand1, SessionResponse0, SessionResponse1,
};
use crate::transport::Link;

pub use cipher::{Role, SessionCipher};

/// Endpoint used for the handshake.
pub const SESSION_ENDPOINT: &str = "prov-session";

/// Handshake error code for transport or framing failures.
pub const CODE_TRANSPORT: i32 = 10;
/// Handshake error code for a device that answered with the wrong level.
pub const CODE_PROTOCOL: i32 = 11;
/// Handshake error code for a device proof that does not match.
pub const CODE_VERIFY_MISMATCH: i32 = 12;

/// Security level of a provisioning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityLevel {
    /// No encryption.
    #[default]
    Unsecured,
    /// Proof-of-possession key exchange, version 1.
    Secure1,
    /// Salted proof-of-possession key exchange, version 2.
    Secure2,
}

impl SecurityLevel {
    /// Lenient parse: `None` and unrecognised values fall back to
    /// [`SecurityLevel::Unsecured`] so older callers keep working.
    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(str::parse::<Self>) {
            Some(Ok(level)) => level,
            Some(Err(_)) => {
                debug!("Unrecognised security level {:?}, using unsecured", value);
                Self::Unsecured
            }
            None => Self::Unsecured,
        }
    }

    /// Whether payloads are encrypted at this level.
    pub fn is_secure(&self) -> bool {
        !matches!(self, Self::Unsecured)
    }
}

impl FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "unsecure" | "unsecured" | "secure0" => Ok(Self::Unsecured),
            "secure1" => Ok(Self::Secure1),
            "secure2" => Ok(Self::Secure2),
            _ => Err(Error::InvalidParameter {
                name: "security".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsecured => write!(f, "unsecured"),
            Self::Secure1 => write!(f, "secure1"),
            Self::Secure2 => write!(f, "secure2"),
        }
    }
}

/// Shared secret proving the caller may provision a device.
///
/// The bytes are wiped when the value is dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProofOfPossession(Vec<u8>);

impl ProofOfPossession {
    /// Wrap raw secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// The secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ProofOfPossession {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for ProofOfPossession {
    fn from(value: &[u8]) -> Self {
        Self::new(value.to_vec())
    }
}

impl fmt::Debug for ProofOfPossession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofOfPossession(<{} bytes>)", self.0.len())
    }
}

/// Derive the Secure1 session key.
pub fn derive_sec1_key(shared: &[u8; 32], pop: &ProofOfPossession) -> [u8; 32] {
    let mut key: [u8; 32] = Sha256::digest(shared).into();
    let pop_hash: [u8; 32] = Sha256::digest(pop.as_bytes()).into();
    for (k, p) in key.iter_mut().zip(pop_hash.iter()) {
        *k ^= p;
    }
    key
}

/// Derive the Secure2 session key.
pub fn derive_sec2_key(
    shared: &[u8; 32],
    salt: &[u8; 16],
    username: &str,
    pop: &ProofOfPossession,
) -> [u8; 32] {
    let mut identity = Sha256::new();
    identity.update(username.as_bytes());
    identity.update(b":");
    identity.update(pop.as_bytes());
    let identity = identity.finalize();

    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(salt);
    hasher.update(identity);
    hasher.finalize().into()
}

/// An authenticated channel to one device.
///
/// Owns the underlying link; it is consumed by [`SecureSession::close`] and
/// never reused afterwards. A session dropped without being closed, such as
/// one held by a cancelled operation, closes its link in the background.
pub struct SecureSession {
    link: Option<Box<dyn Link>>,
    cipher: SessionCipher,
    level: SecurityLevel,
    response_timeout: Duration,
}

impl SecureSession {
    /// Security level negotiated for this session.
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    /// Encrypt and send `payload` to `endpoint`, then read and decrypt the reply.
    pub async fn request(&mut self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let link = self
            .link
            .as_deref()
            .ok_or_else(|| Error::Internal("session already closed".to_string()))?;
        let sealed = self.cipher.encrypt(payload)?;
        let reply = exchange(link, endpoint, &sealed, self.response_timeout).await?;
        self.cipher.decrypt(&reply)
    }

    /// Close the underlying link.
    pub async fn close(mut self) -> Result<()> {
        debug!("Closing {} session", self.level);
        match self.link.take() {
            Some(link) => link.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("{} session dropped outside a runtime", self.level);
            return;
        };

        debug!("Closing abandoned {} session", self.level);
        runtime.spawn(async move {
            if let Err(e) = link.close().await {
                warn!("Failed to close abandoned session: {}", e);
            }
        });
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("level", &self.level)
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// Write a frame and read the reply, bounded by `timeout`.
pub(crate) async fn exchange(
    link: &dyn Link,
    endpoint: &str,
    data: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let round_trip = async {
        link.write(endpoint, data).await?;
        link.read(endpoint).await
    };

    tokio::time::timeout(timeout, round_trip)
        .await
        .map_err(|_| Error::timeout(format!("response from {}", endpoint)))?
}

/// Run the handshake for `level` over `link`.
///
/// On failure the link is returned to the caller untouched so it can still
/// be closed; the failure itself is terminal for this session.
pub async fn handshake(
    link: Box<dyn Link>,
    level: SecurityLevel,
    pop: &ProofOfPossession,
    sec2_username: &str,
    response_timeout: Duration,
) -> std::result::Result<SecureSession, (Box<dyn Link>, Error)> {
    let cipher = match level {
        SecurityLevel::Unsecured => Ok(SessionCipher::passthrough()),
        SecurityLevel::Secure1 => {
            secure_exchange(link.as_ref(), pop, None, response_timeout).await
        }
        SecurityLevel::Secure2 => {
            secure_exchange(link.as_ref(), pop, Some(sec2_username), response_timeout).await
        }
    };

    match cipher {
        Ok(cipher) => {
            info!("Established {} session", level);
            Ok(SecureSession {
                link: Some(link),
                cipher,
                level,
                response_timeout,
            })
        }
        Err(e) => {
            warn!("{} handshake failed: {}", level, e);
            Err((link, e))
        }
    }
}

fn as_handshake_error(e: Error) -> Error {
    match e {
        Error::HandshakeFailed { .. } => e,
        other => Error::HandshakeFailed {
            code: CODE_TRANSPORT,
            message: other.to_string(),
        },
    }
}

async fn secure_exchange(
    link: &dyn Link,
    pop: &ProofOfPossession,
    sec2_username: Option<&str>,
    timeout: Duration,
) -> Result<SessionCipher> {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let client_pubkey = PublicKey::from(&secret);

    debug!("Sending session command 0");
    let command0 = SessionCommand0 {
        client_pubkey: client_pubkey.to_bytes(),
        username: sec2_username.map(str::to_string),
    };
    let reply = exchange(link, SESSION_ENDPOINT, &command0.to_bytes()?, timeout)
        .await
        .map_err(as_handshake_error)?;
    let response0 = SessionResponse0::from_bytes(&reply).map_err(as_handshake_error)?;
    check_status("session command 0", response0.status)?;

    let shared = secret.diffie_hellman(&PublicKey::from(response0.device_pubkey));
    let key = match (sec2_username, response0.salt) {
        (None, _) => derive_sec1_key(shared.as_bytes(), pop),
        (Some(username), Some(salt)) => derive_sec2_key(shared.as_bytes(), &salt, username, pop),
        (Some(_), None) => {
            return Err(Error::HandshakeFailed {
                code: CODE_PROTOCOL,
                message: "device did not provide a salt".to_string(),
            })
        }
    };
    let mut cipher = SessionCipher::new(key, &response0.device_random, Role::Client);

    debug!("Sending session command 1");
    let command1 = SessionCommand1 {
        client_verify: cipher.encrypt(&response0.device_pubkey)?,
    };
    let reply = exchange(link, SESSION_ENDPOINT, &command1.to_bytes()?, timeout)
        .await
        .map_err(as_handshake_error)?;
    let response1 = SessionResponse1::from_bytes(&reply).map_err(as_handshake_error)?;
    check_status("session command 1", response1.status)?;

    let device_proof = cipher.decrypt(&response1.device_verify)?;
    if device_proof != client_pubkey.to_bytes() {
        return Err(Error::HandshakeFailed {
            code: CODE_VERIFY_MISMATCH,
            message: "device proof does not match".to_string(),
        });
    }

    Ok(cipher)
}
