//! CRC calculation for framed endpoint messages.
//!
//! Uses the CRC-16/CCITT-FALSE polynomial (0x1021) over the message type,
//! length and payload of every frame.

/// CRC-16/CCITT-FALSE polynomial
const CRC_POLYNOMIAL: u16 = 0x1021;

/// Initial CRC value
const CRC_INITIAL: u16 = 0xFFFF;

/// Calculate CRC-16 for frame data.
///
/// # Example
///
/// ```
/// use esp_ble_prov::protocol::calculate_crc;
///
/// assert_eq!(calculate_crc(b"123456789"), 0x29B1);
/// ```
pub fn calculate_crc(data: &[u8]) -> u16 {
    let mut crc = CRC_INITIAL;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_empty() {
        assert_eq!(calculate_crc(&[]), CRC_INITIAL);
    }

    #[test]
    fn test_crc_check_value() {
        // Standard check value for CRC-16/CCITT-FALSE
        assert_eq!(calculate_crc(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc_different_data() {
        assert_ne!(calculate_crc(&[0x01, 0x02, 0x03]), calculate_crc(&[0x01, 0x02, 0x04]));
    }
}
