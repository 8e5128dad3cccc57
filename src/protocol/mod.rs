//! Protocol module for parsing and constructing messages.
//!
//! This module contains the implementations for:
//! - Frame layout and typed message encoding
//! - Session handshake messages
//! - Wi-Fi scan and configuration messages
//! - CRC calculation

pub mod crc;
pub mod frame;
pub mod session;
pub mod wifi;

pub use crc::calculate_crc;
pub use frame::{Frame, MessageType, WireMessage};
