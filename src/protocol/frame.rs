//! Frame format shared by every provisioning endpoint.
//!
//! Frame layout:
//! - Magic(2) + CRC(2, LE) + MsgType(1) + PayloadLen(2, LE) + Payload
//!
//! The CRC covers MsgType, PayloadLen and Payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::crc::calculate_crc;

/// Frame magic bytes.
pub const FRAME_MAGIC: [u8; 2] = [0xE5, 0x50];

/// Message types carried in a frame.
///
/// Responses set the high bit of the matching request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Session establishment, first round.
    SessionCommand0 = 0x01,
    /// Session establishment, second round.
    SessionCommand1 = 0x02,
    /// Start a Wi-Fi scan on the device.
    ScanStart = 0x10,
    /// Query Wi-Fi scan progress.
    ScanStatus = 0x11,
    /// Fetch a page of Wi-Fi scan results.
    ScanResult = 0x12,
    /// Query the device's station state.
    GetStatus = 0x20,
    /// Send Wi-Fi credentials.
    SetConfig = 0x21,
    /// Apply previously sent credentials.
    ApplyConfig = 0x22,

    /// Response to [`MessageType::SessionCommand0`].
    SessionResponse0 = 0x81,
    /// Response to [`MessageType::SessionCommand1`].
    SessionResponse1 = 0x82,
    /// Response to [`MessageType::ScanStart`].
    ScanStartResponse = 0x90,
    /// Response to [`MessageType::ScanStatus`].
    ScanStatusResponse = 0x91,
    /// Response to [`MessageType::ScanResult`].
    ScanResultResponse = 0x92,
    /// Response to [`MessageType::GetStatus`].
    GetStatusResponse = 0xA0,
    /// Response to [`MessageType::SetConfig`].
    SetConfigResponse = 0xA1,
    /// Response to [`MessageType::ApplyConfig`].
    ApplyConfigResponse = 0xA2,

    /// Unknown message type.
    Unknown = 0xFF,
}

impl MessageType {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x01 => Self::SessionCommand0,
            0x02 => Self::SessionCommand1,
            0x10 => Self::ScanStart,
            0x11 => Self::ScanStatus,
            0x12 => Self::ScanResult,
            0x20 => Self::GetStatus,
            0x21 => Self::SetConfig,
            0x22 => Self::ApplyConfig,
            0x81 => Self::SessionResponse0,
            0x82 => Self::SessionResponse1,
            0x90 => Self::ScanStartResponse,
            0x91 => Self::ScanStatusResponse,
            0x92 => Self::ScanResultResponse,
            0xA0 => Self::GetStatusResponse,
            0xA1 => Self::SetConfigResponse,
            0xA2 => Self::ApplyConfigResponse,
            _ => Self::Unknown,
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Check if this is a response message.
    pub fn is_response(&self) -> bool {
        !matches!(self, Self::Unknown) && (*self as u8) & 0x80 != 0
    }

    /// Get the expected response type for a request.
    pub fn response_type(&self) -> Option<Self> {
        if self.is_response() || matches!(self, Self::Unknown) {
            return None;
        }

        Some(Self::from_raw((*self as u8) | 0x80))
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type.
    pub message_type: MessageType,
    /// Message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Header size in bytes (magic + CRC + type + length).
    pub const HEADER_SIZE: usize = 7;

    /// Create a new frame.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Parse a frame from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::InvalidData {
                context: format!("Frame too short: {} bytes", data.len()),
            });
        }

        if data[..2] != FRAME_MAGIC {
            return Err(Error::InvalidData {
                context: format!("Invalid magic bytes: {:#04x} {:#04x}", data[0], data[1]),
            });
        }

        let received_crc = u16::from_le_bytes([data[2], data[3]]);
        let payload_len = u16::from_le_bytes([data[5], data[6]]) as usize;
        let expected_len = Self::HEADER_SIZE + payload_len;

        if data.len() < expected_len {
            return Err(Error::InvalidData {
                context: format!(
                    "Frame incomplete: have {} bytes, need {}",
                    data.len(),
                    expected_len
                ),
            });
        }

        let calculated_crc = calculate_crc(&data[4..expected_len]);
        if received_crc != calculated_crc {
            return Err(Error::CrcMismatch {
                expected: calculated_crc,
                actual: received_crc,
            });
        }

        Ok(Self {
            message_type: MessageType::from_raw(data[4]),
            payload: Bytes::copy_from_slice(&data[Self::HEADER_SIZE..expected_len]),
        })
    }

    /// Serialize the frame to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload_len = u16::try_from(self.payload.len()).map_err(|_| Error::InvalidParameter {
            name: "payload".to_string(),
            value: format!("{} bytes", self.payload.len()),
        })?;

        let mut body = BytesMut::with_capacity(3 + self.payload.len());
        body.put_u8(self.message_type.to_raw());
        body.put_u16_le(payload_len);
        body.put_slice(&self.payload);

        let crc = calculate_crc(&body);

        let mut data = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());
        data.extend_from_slice(&FRAME_MAGIC);
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&body);

        Ok(data)
    }
}

/// A message that travels inside a single frame.
pub trait WireMessage: Sized {
    /// The frame type this message is carried in.
    const TYPE: MessageType;

    /// Append the payload encoding to `buf`.
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Decode the payload.
    fn decode_payload(reader: &mut PayloadReader) -> Result<Self>;

    /// Encode into a complete frame.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.encode_payload(&mut buf);
        Frame::new(Self::TYPE, buf.freeze()).to_bytes()
    }

    /// Decode from a complete frame, checking the message type.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let frame = Frame::parse(data)?;
        if frame.message_type != Self::TYPE {
            return Err(Error::InvalidData {
                context: format!(
                    "Unexpected message type: expected {:?}, got {:?}",
                    Self::TYPE,
                    frame.message_type
                ),
            });
        }

        let mut reader = PayloadReader::new(frame.payload);
        let message = Self::decode_payload(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

/// Bounds-checked reader over a frame payload.
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    /// Wrap a payload.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(Error::InvalidData {
                context: format!(
                    "Truncated {}: need {} bytes, have {}",
                    what,
                    needed,
                    self.buf.remaining()
                ),
            });
        }
        Ok(())
    }

    /// Read one byte.
    pub fn u8(&mut self, what: &str) -> Result<u8> {
        self.ensure(1, what)?;
        Ok(self.buf.get_u8())
    }

    /// Read a signed byte.
    pub fn i8(&mut self, what: &str) -> Result<i8> {
        self.ensure(1, what)?;
        Ok(self.buf.get_i8())
    }

    /// Read a little-endian u16.
    pub fn u16(&mut self, what: &str) -> Result<u16> {
        self.ensure(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a little-endian u32.
    pub fn u32(&mut self, what: &str) -> Result<u32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a boolean byte.
    pub fn bool(&mut self, what: &str) -> Result<bool> {
        Ok(self.u8(what)? != 0)
    }

    /// Read a fixed-size array.
    pub fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        self.ensure(N, what)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Read a u16-length-prefixed byte string.
    pub fn bytes(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.u16(what)? as usize;
        self.ensure(len, what)?;
        Ok(self.buf.split_to(len).to_vec())
    }

    /// Read a u8-length-prefixed UTF-8 string.
    pub fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u8(what)? as usize;
        self.ensure(len, what)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| Error::InvalidData {
            context: format!("Invalid UTF-8 in {}", what),
        })
    }

    /// Fail if unread bytes remain.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(Error::InvalidData {
                context: format!("{} trailing bytes in payload", self.buf.remaining()),
            });
        }
        Ok(())
    }
}

/// Write a u16-length-prefixed byte string.
pub(crate) fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u16_le(data.len().min(u16::MAX as usize) as u16);
    buf.put_slice(&data[..data.len().min(u16::MAX as usize)]);
}

/// Write a u8-length-prefixed string, truncated to 255 bytes.
pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    let raw = value.as_bytes();
    let len = raw.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&raw[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_message_type_response_mapping() {
        assert_eq!(
            MessageType::SessionCommand0.response_type(),
            Some(MessageType::SessionResponse0)
        );
        assert_eq!(
            MessageType::ApplyConfig.response_type(),
            Some(MessageType::ApplyConfigResponse)
        );
        assert!(MessageType::ScanResultResponse.is_response());
        assert_eq!(MessageType::ScanResultResponse.response_type(), None);
        assert!(!MessageType::Unknown.is_response());
        assert_eq!(MessageType::Unknown.response_type(), None);
    }

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(MessageType::GetStatus, vec![0xAB]);
        let bytes = frame.to_bytes().unwrap();

        assert_eq!(&bytes[..2], &FRAME_MAGIC);
        assert_eq!(bytes[4], 0x20);
        assert_eq!(u16::from_le_bytes([bytes[5], bytes[6]]), 1);
        assert_eq!(bytes[7], 0xAB);
        assert_eq!(Frame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_frame_crc_mismatch() {
        let mut bytes = Frame::new(MessageType::ScanStatus, vec![1, 2, 3])
            .to_bytes()
            .unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            Frame::parse(&bytes),
            Err(Error::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_bad_magic_and_truncation() {
        assert!(matches!(
            Frame::parse(&[0x00, 0x00, 0, 0, 0x20, 0, 0]),
            Err(Error::InvalidData { .. })
        ));

        let bytes = Frame::new(MessageType::SetConfig, vec![9; 10])
            .to_bytes()
            .unwrap();
        assert!(matches!(
            Frame::parse(&bytes[..bytes.len() - 1]),
            Err(Error::InvalidData { .. })
        ));
    }

    #[test]
    fn test_reader_rejects_trailing_bytes() {
        let mut reader = PayloadReader::new(Bytes::from_static(&[1, 2]));
        assert_eq!(reader.u8("first").unwrap(), 1);
        assert!(reader.finish().is_err());
    }

    proptest! {
        #[test]
        fn parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Frame::parse(&data);
        }
    }
}
