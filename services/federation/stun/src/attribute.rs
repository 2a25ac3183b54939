//! STUN attribute TLV codec.
//!
//! Each attribute is a 16-bit type, a 16-bit length of the unpadded
//! content, the content itself and zero padding up to the next 4-byte
//! boundary. XOR-MAPPED-ADDRESS needs the transaction id of the containing
//! message, so both directions take it as a parameter.

use crate::header::{TransactionId, MAGIC_COOKIE};
use crate::StunError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// MAPPED-ADDRESS
pub const MAPPED_ADDRESS: u16 = 0x0001;
/// USERNAME
pub const USERNAME: u16 = 0x0006;
/// MESSAGE-INTEGRITY
pub const MESSAGE_INTEGRITY: u16 = 0x0008;
/// ERROR-CODE
pub const ERROR_CODE: u16 = 0x0009;
/// UNKNOWN-ATTRIBUTES
pub const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
/// XOR-MAPPED-ADDRESS
pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// PRIORITY (ICE)
pub const PRIORITY: u16 = 0x0024;
/// USE-CANDIDATE (ICE)
pub const USE_CANDIDATE: u16 = 0x0025;
/// GUID-PREFIX (vendor extension, comprehension-optional)
pub const GUID_PREFIX: u16 = 0xC000;
/// FINGERPRINT
pub const FINGERPRINT: u16 = 0x8028;
/// ICE-CONTROLLED
pub const ICE_CONTROLLED: u16 = 0x8029;
/// ICE-CONTROLLING
pub const ICE_CONTROLLING: u16 = 0x802A;

/// Largest USERNAME content
pub const MAX_USERNAME_SIZE: usize = 512;
/// Largest ERROR-CODE reason phrase
pub const MAX_REASON_SIZE: usize = 763;
/// MESSAGE-INTEGRITY digest size (HMAC-SHA1)
pub const MESSAGE_INTEGRITY_SIZE: usize = 20;
/// GUID prefix size
pub const GUID_PREFIX_SIZE: usize = 12;
/// TLV header size
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// A decoded STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Address in the clear
    MappedAddress(SocketAddr),
    /// Short-term credential user name
    Username(String),
    /// HMAC-SHA1 digest, filled in when the message is serialized
    MessageIntegrity([u8; MESSAGE_INTEGRITY_SIZE]),
    /// Error code in 300..=699 with a reason phrase
    ErrorCode {
        /// Numeric code
        code: u16,
        /// Reason phrase
        reason: String,
    },
    /// Attribute types the sender did not understand
    UnknownAttributes(Vec<u16>),
    /// Address obfuscated with the magic cookie and transaction id
    XorMappedAddress(SocketAddr),
    /// ICE candidate priority
    Priority(u32),
    /// ICE nomination marker
    UseCandidate,
    /// CRC-32 of the preceding bytes XOR 0x5354554E, filled in on serialize
    Fingerprint(u32),
    /// ICE-CONTROLLED tie breaker
    IceControlled(u64),
    /// ICE-CONTROLLING tie breaker
    IceControlling(u64),
    /// RTPS GUID prefix of the sender
    GuidPrefix([u8; GUID_PREFIX_SIZE]),
    /// Unrecognised type; content was skipped
    Unknown {
        /// Type code as received
        attribute_type: u16,
        /// Unpadded content length as received
        length: u16,
    },
}

/// Padding needed after `length` content bytes
pub fn padding(length: usize) -> usize {
    (4 - (length & 0x3)) % 4
}

impl Attribute {
    /// Fresh MESSAGE-INTEGRITY placeholder
    pub fn message_integrity() -> Self {
        Attribute::MessageIntegrity([0; MESSAGE_INTEGRITY_SIZE])
    }

    /// Fresh FINGERPRINT placeholder
    pub fn fingerprint() -> Self {
        Attribute::Fingerprint(0)
    }

    /// ERROR-CODE with reason
    pub fn error_code(code: u16, reason: impl Into<String>) -> Self {
        Attribute::ErrorCode {
            code,
            reason: reason.into(),
        }
    }

    /// Wire type code
    pub fn attribute_type(&self) -> u16 {
        match self {
            Attribute::MappedAddress(_) => MAPPED_ADDRESS,
            Attribute::Username(_) => USERNAME,
            Attribute::MessageIntegrity(_) => MESSAGE_INTEGRITY,
            Attribute::ErrorCode { .. } => ERROR_CODE,
            Attribute::UnknownAttributes(_) => UNKNOWN_ATTRIBUTES,
            Attribute::XorMappedAddress(_) => XOR_MAPPED_ADDRESS,
            Attribute::Priority(_) => PRIORITY,
            Attribute::UseCandidate => USE_CANDIDATE,
            Attribute::Fingerprint(_) => FINGERPRINT,
            Attribute::IceControlled(_) => ICE_CONTROLLED,
            Attribute::IceControlling(_) => ICE_CONTROLLING,
            Attribute::GuidPrefix(_) => GUID_PREFIX,
            Attribute::Unknown { attribute_type, .. } => *attribute_type,
        }
    }

    /// Unpadded content length
    pub fn length(&self) -> u16 {
        match self {
            Attribute::MappedAddress(addr) | Attribute::XorMappedAddress(addr) => {
                if addr.is_ipv4() {
                    8
                } else {
                    20
                }
            }
            Attribute::Username(username) => username.len() as u16,
            Attribute::MessageIntegrity(_) => MESSAGE_INTEGRITY_SIZE as u16,
            Attribute::ErrorCode { reason, .. } => (4 + reason.len()) as u16,
            Attribute::UnknownAttributes(types) => (2 * types.len()) as u16,
            Attribute::Priority(_) => 4,
            Attribute::UseCandidate => 0,
            Attribute::Fingerprint(_) => 4,
            Attribute::IceControlled(_) | Attribute::IceControlling(_) => 8,
            Attribute::GuidPrefix(_) => GUID_PREFIX_SIZE as u16,
            Attribute::Unknown { length, .. } => *length,
        }
    }

    /// Bytes occupied on the wire including the TLV header and padding
    pub fn encoded_size(&self) -> usize {
        let length = self.length() as usize;
        ATTRIBUTE_HEADER_SIZE + length + padding(length)
    }

    /// Decode one attribute, consuming its padding.
    pub fn decode(buf: &mut Bytes, transaction_id: &TransactionId) -> Result<Self, StunError> {
        if buf.remaining() < ATTRIBUTE_HEADER_SIZE {
            return Err(StunError::Incomplete);
        }

        let attribute_type = buf.get_u16();
        let length = buf.get_u16();

        if buf.remaining() < length as usize {
            return Err(StunError::Incomplete);
        }
        let mut content = buf.split_to(length as usize);

        let attribute = match attribute_type {
            MAPPED_ADDRESS => Attribute::MappedAddress(decode_address(
                attribute_type,
                length,
                &mut content,
                None,
            )?),
            XOR_MAPPED_ADDRESS => Attribute::XorMappedAddress(decode_address(
                attribute_type,
                length,
                &mut content,
                Some(transaction_id),
            )?),
            USERNAME => {
                if content.len() > MAX_USERNAME_SIZE {
                    return Err(StunError::TooLong {
                        attribute_type,
                        length: content.len(),
                        max: MAX_USERNAME_SIZE,
                    });
                }
                Attribute::Username(text(attribute_type, &content)?)
            }
            MESSAGE_INTEGRITY => {
                let mut digest = [0u8; MESSAGE_INTEGRITY_SIZE];
                fixed(attribute_type, length, &mut content, &mut digest)?;
                Attribute::MessageIntegrity(digest)
            }
            ERROR_CODE => {
                if content.len() < 4 {
                    return Err(StunError::AttributeLength {
                        attribute_type,
                        length,
                    });
                }
                let value = content.get_u32();
                let class = ((value >> 8) & 0x7) as u8;
                let number = (value & 0xFF) as u8;
                if !(3..=6).contains(&class) || number >= 100 {
                    return Err(StunError::ErrorClass { class, number });
                }
                if content.len() > MAX_REASON_SIZE {
                    return Err(StunError::TooLong {
                        attribute_type,
                        length: content.len(),
                        max: MAX_REASON_SIZE,
                    });
                }
                Attribute::ErrorCode {
                    code: class as u16 * 100 + number as u16,
                    reason: text(attribute_type, &content)?,
                }
            }
            UNKNOWN_ATTRIBUTES => {
                if length % 2 != 0 {
                    return Err(StunError::AttributeLength {
                        attribute_type,
                        length,
                    });
                }
                let mut types = Vec::with_capacity(length as usize / 2);
                while content.has_remaining() {
                    types.push(content.get_u16());
                }
                Attribute::UnknownAttributes(types)
            }
            PRIORITY => {
                expect_length(attribute_type, length, 4)?;
                Attribute::Priority(content.get_u32())
            }
            USE_CANDIDATE => {
                expect_length(attribute_type, length, 0)?;
                Attribute::UseCandidate
            }
            FINGERPRINT => {
                expect_length(attribute_type, length, 4)?;
                Attribute::Fingerprint(content.get_u32())
            }
            ICE_CONTROLLED => {
                expect_length(attribute_type, length, 8)?;
                Attribute::IceControlled(content.get_u64())
            }
            ICE_CONTROLLING => {
                expect_length(attribute_type, length, 8)?;
                Attribute::IceControlling(content.get_u64())
            }
            GUID_PREFIX => {
                let mut prefix = [0u8; GUID_PREFIX_SIZE];
                fixed(attribute_type, length, &mut content, &mut prefix)?;
                Attribute::GuidPrefix(prefix)
            }
            _ => Attribute::Unknown {
                attribute_type,
                length,
            },
        };

        // All attributes are aligned on 32-bit boundaries.
        let pad = padding(length as usize);
        if buf.remaining() < pad {
            return Err(StunError::Incomplete);
        }
        buf.advance(pad);

        Ok(attribute)
    }

    /// Encode the attribute followed by its zero padding.
    pub fn encode(
        &self,
        buf: &mut BytesMut,
        transaction_id: &TransactionId,
    ) -> Result<(), StunError> {
        let attribute_type = self.attribute_type();
        let length = self.length();

        match self {
            Attribute::Username(username) if username.len() > MAX_USERNAME_SIZE => {
                return Err(StunError::TooLong {
                    attribute_type,
                    length: username.len(),
                    max: MAX_USERNAME_SIZE,
                });
            }
            Attribute::ErrorCode { code, reason } => {
                if reason.len() > MAX_REASON_SIZE {
                    return Err(StunError::TooLong {
                        attribute_type,
                        length: reason.len(),
                        max: MAX_REASON_SIZE,
                    });
                }
                if !(300..700).contains(code) {
                    return Err(StunError::ErrorClass {
                        class: (code / 100) as u8,
                        number: (code % 100) as u8,
                    });
                }
            }
            Attribute::UnknownAttributes(types) if 2 * types.len() > u16::MAX as usize => {
                return Err(StunError::TooLong {
                    attribute_type,
                    length: 2 * types.len(),
                    max: u16::MAX as usize,
                });
            }
            Attribute::Unknown { .. } => return Err(StunError::Unserializable(attribute_type)),
            _ => {}
        }

        buf.put_u16(attribute_type);
        buf.put_u16(length);

        match self {
            Attribute::MappedAddress(addr) => encode_address(buf, addr, None),
            Attribute::XorMappedAddress(addr) => encode_address(buf, addr, Some(transaction_id)),
            Attribute::Username(username) => buf.put_slice(username.as_bytes()),
            Attribute::MessageIntegrity(digest) => buf.put_slice(digest),
            Attribute::ErrorCode { code, reason } => {
                buf.put_u16(0);
                buf.put_u8((code / 100) as u8);
                buf.put_u8((code % 100) as u8);
                buf.put_slice(reason.as_bytes());
            }
            Attribute::UnknownAttributes(types) => {
                for attribute_type in types {
                    buf.put_u16(*attribute_type);
                }
            }
            Attribute::Priority(priority) => buf.put_u32(*priority),
            Attribute::UseCandidate => {}
            Attribute::Fingerprint(fingerprint) => buf.put_u32(*fingerprint),
            Attribute::IceControlled(tie_breaker) | Attribute::IceControlling(tie_breaker) => {
                buf.put_u64(*tie_breaker)
            }
            Attribute::GuidPrefix(prefix) => buf.put_slice(prefix),
            Attribute::Unknown { .. } => {}
        }

        buf.put_bytes(0, padding(length as usize));
        Ok(())
    }
}

fn expect_length(attribute_type: u16, length: u16, expected: u16) -> Result<(), StunError> {
    if length != expected {
        return Err(StunError::AttributeLength {
            attribute_type,
            length,
        });
    }
    Ok(())
}

fn fixed(
    attribute_type: u16,
    length: u16,
    content: &mut Bytes,
    out: &mut [u8],
) -> Result<(), StunError> {
    expect_length(attribute_type, length, out.len() as u16)?;
    content.copy_to_slice(out);
    Ok(())
}

fn text(attribute_type: u16, content: &[u8]) -> Result<String, StunError> {
    String::from_utf8(content.to_vec()).map_err(|_| StunError::Utf8(attribute_type))
}

/// XOR key for address bytes: the magic cookie followed by the transaction id
fn xor_key(transaction_id: &TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(&transaction_id.0);
    key
}

fn decode_address(
    attribute_type: u16,
    length: u16,
    content: &mut Bytes,
    xor: Option<&TransactionId>,
) -> Result<SocketAddr, StunError> {
    if content.len() < 4 {
        return Err(StunError::AttributeLength {
            attribute_type,
            length,
        });
    }

    content.advance(1);
    let family = content.get_u8();
    let mut port = content.get_u16();
    if xor.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        FAMILY_IPV4 => {
            expect_length(attribute_type, length, 8)?;
            let mut address = content.get_u32();
            if xor.is_some() {
                address ^= MAGIC_COOKIE;
            }
            IpAddr::V4(Ipv4Addr::from(address))
        }
        FAMILY_IPV6 => {
            expect_length(attribute_type, length, 20)?;
            let mut octets = [0u8; 16];
            content.copy_to_slice(&mut octets);
            if let Some(transaction_id) = xor {
                for (octet, key) in octets.iter_mut().zip(xor_key(transaction_id)) {
                    *octet ^= key;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(StunError::Family(other)),
    };

    Ok(SocketAddr::new(ip, port))
}

fn encode_address(buf: &mut BytesMut, addr: &SocketAddr, xor: Option<&TransactionId>) {
    let port = match xor {
        Some(_) => addr.port() ^ (MAGIC_COOKIE >> 16) as u16,
        None => addr.port(),
    };

    buf.put_u8(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(port);
            let address = u32::from(ip);
            buf.put_u32(if xor.is_some() {
                address ^ MAGIC_COOKIE
            } else {
                address
            });
        }
        IpAddr::V6(ip) => {
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(port);
            let mut octets = ip.octets();
            if let Some(transaction_id) = xor {
                for (octet, key) in octets.iter_mut().zip(xor_key(transaction_id)) {
                    *octet ^= key;
                }
            }
            buf.put_slice(&octets);
        }
    }
}
