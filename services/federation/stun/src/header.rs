//! Fixed STUN header processing.
//!
//! This module defines the 20-byte header every STUN message starts with:
//! the packed class/method type field, the attribute length, the magic
//! cookie and the 96-bit transaction id (RFC 5389 Section 6).

use crate::StunError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// STUN magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Transaction id size in bytes
pub const TRANSACTION_ID_SIZE: usize = 12;

/// Value XORed into the CRC-32 carried by FINGERPRINT ("STUN")
pub const FINGERPRINT_XOR: u32 = 0x5354_554E;

/// Message class (two bits of the type field)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// Request expecting a response
    Request = 0b00,
    /// Indication, no response expected
    Indication = 0b01,
    /// Success response
    SuccessResponse = 0b10,
    /// Error response
    ErrorResponse = 0b11,
}

impl Class {
    /// Build a class from its two-bit wire value
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Class::Request,
            0b01 => Class::Indication,
            0b10 => Class::SuccessResponse,
            _ => Class::ErrorResponse,
        }
    }
}

/// Message method (twelve bits of the type field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Binding (0x001)
    Binding,
    /// Any method this implementation does not handle
    Unknown(u16),
}

impl Method {
    /// Build a method from its twelve-bit wire value
    pub fn from_u16(value: u16) -> Self {
        match value & 0x0FFF {
            0x001 => Method::Binding,
            other => Method::Unknown(other),
        }
    }

    /// Twelve-bit wire value
    pub fn as_u16(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Unknown(value) => value & 0x0FFF,
        }
    }
}

/// Pack class and method into the 14-bit message type.
///
/// ```text
///  0                 1
///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
/// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn message_type(class: Class, method: Method) -> u16 {
    let c = class as u16;
    let m = method.as_u16();
    ((m & 0x0F80) << 2) | ((c & 0x2) << 7) | ((m & 0x0070) << 1) | ((c & 0x1) << 4) | (m & 0x000F)
}

/// Split a message type back into class and method
pub fn split_message_type(message_type: u16) -> (Class, Method) {
    let class = ((message_type & 0x0100) >> 7) | ((message_type & 0x0010) >> 4);
    let method =
        ((message_type & 0x3E00) >> 2) | ((message_type & 0x00E0) >> 1) | (message_type & 0x000F);
    (Class::from_bits(class as u8), Method::from_u16(method))
}

/// 96-bit transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Fresh random transaction id
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; TRANSACTION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Decoded STUN header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StunHeader {
    /// Message class
    pub class: Class,
    /// Message method
    pub method: Method,
    /// Attribute bytes following the header
    pub length: u16,
    /// Transaction id
    pub transaction_id: TransactionId,
}

impl StunHeader {
    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(message_type(self.class, self.method));
        buf.put_u16(self.length);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id.0);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, StunError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(StunError::Incomplete);
        }

        let raw_type = buf.get_u16();
        if raw_type & 0xC000 != 0 {
            return Err(StunError::Reserved(raw_type));
        }

        let length = buf.get_u16();

        let cookie = buf.get_u32();
        if cookie != MAGIC_COOKIE {
            return Err(StunError::MagicCookie(cookie));
        }

        let mut transaction_id = [0u8; TRANSACTION_ID_SIZE];
        buf.copy_to_slice(&mut transaction_id);

        let (class, method) = split_message_type(raw_type);

        Ok(Self {
            class,
            method,
            length,
            transaction_id: TransactionId(transaction_id),
        })
    }
}
