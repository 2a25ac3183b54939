//! STUN message container.
//!
//! A [`Message`] owns the header fields and the ordered attribute list.
//! It keeps the running attribute length and the length recorded when
//! MESSAGE-INTEGRITY was appended, so integrity and fingerprint values can
//! be recomputed over exactly the bytes they cover:
//!
//! ```text
//! +----------------------+----------------------------------------------+
//! | header (20B)         | length field = full length, except while     |
//! |                      | hashing MESSAGE-INTEGRITY                    |
//! +----------------------+----------------------------------------------+
//! | attributes ...       | covered by MESSAGE-INTEGRITY and FINGERPRINT |
//! +----------------------+----------------------------------------------+
//! | MESSAGE-INTEGRITY    | covered by FINGERPRINT                       |
//! +----------------------+----------------------------------------------+
//! | FINGERPRINT          | always last                                  |
//! +----------------------+----------------------------------------------+
//! ```
//!
//! A message under construction is exclusively owned by its builder;
//! [`Message::serialize`] takes `&mut self` because it stores the
//! recomputed digests back into the attribute list.

use crate::attribute::{Attribute, ATTRIBUTE_HEADER_SIZE, MESSAGE_INTEGRITY_SIZE};
use crate::header::{Class, Method, StunHeader, TransactionId, HEADER_SIZE};
use crate::integrity;
use crate::StunError;
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use tracing::debug;

/// Size of a MESSAGE-INTEGRITY attribute on the wire
const MESSAGE_INTEGRITY_ATTRIBUTE_SIZE: usize = ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE;

/// Largest attribute block the 16-bit length field can describe
const MAX_ATTRIBUTES_LENGTH: usize = u16::MAX as usize;

/// A STUN message: header plus ordered attributes
#[derive(Debug, Clone)]
pub struct Message {
    class: Class,
    method: Method,
    transaction_id: TransactionId,
    attributes: Vec<Attribute>,
    /// Attribute bytes including padding
    length: usize,
    /// Attribute bytes through the end of the last MESSAGE-INTEGRITY
    length_for_message_integrity: usize,
    /// Key used when serializing MESSAGE-INTEGRITY
    password: String,
    /// Bytes as last decoded or serialized
    wire: Option<Bytes>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.method == other.method
            && self.transaction_id == other.transaction_id
            && self.attributes == other.attributes
    }
}

impl Eq for Message {}

impl Message {
    /// Create an empty message
    pub fn new(class: Class, method: Method, transaction_id: TransactionId) -> Self {
        Self {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
            length: 0,
            length_for_message_integrity: 0,
            password: String::new(),
            wire: None,
        }
    }

    /// Binding request with a random transaction id
    pub fn binding_request() -> Self {
        Self::new(Class::Request, Method::Binding, TransactionId::random())
    }

    /// Empty response of `class` echoing the request's method and transaction id
    pub fn response_to(request: &Message, class: Class) -> Self {
        Self::new(class, request.method, request.transaction_id)
    }

    /// Message class
    pub fn class(&self) -> Class {
        self.class
    }

    /// Message method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Transaction id
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Replace the transaction id with fresh random bytes
    pub fn generate_transaction_id(&mut self) {
        self.transaction_id = TransactionId::random();
        self.wire = None;
    }

    /// Zero the transaction id
    pub fn clear_transaction_id(&mut self) {
        self.transaction_id = TransactionId::default();
        self.wire = None;
    }

    /// Attributes in append order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Attribute bytes that follow the header (the header's length field)
    pub fn length(&self) -> usize {
        self.length
    }

    /// Attribute bytes through the end of MESSAGE-INTEGRITY, 0 if absent
    pub fn length_for_message_integrity(&self) -> usize {
        self.length_for_message_integrity
    }

    /// Total encoded size including the header
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.length
    }

    /// Key used for MESSAGE-INTEGRITY when serializing
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Append an attribute, updating the cached lengths.
    pub fn append_attribute(&mut self, attribute: Attribute) {
        self.length += attribute.encoded_size();
        if matches!(attribute, Attribute::MessageIntegrity(_)) {
            self.length_for_message_integrity = self.length;
        }
        self.attributes.push(attribute);
    }

    /// Drop every attribute and cached length
    pub fn reset(&mut self) {
        self.attributes.clear();
        self.length = 0;
        self.length_for_message_integrity = 0;
        self.wire = None;
    }

    fn header(&self, length: u16) -> StunHeader {
        StunHeader {
            class: self.class,
            method: self.method,
            length,
            transaction_id: self.transaction_id,
        }
    }

    /// Serialize to bytes.
    ///
    /// MESSAGE-INTEGRITY and FINGERPRINT values are recomputed over the
    /// bytes written before them and stored back into the attribute list.
    pub fn serialize(&mut self) -> Result<Bytes, StunError> {
        if self.length > MAX_ATTRIBUTES_LENGTH {
            return Err(StunError::Length {
                declared: MAX_ATTRIBUTES_LENGTH,
                actual: self.length,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.header(self.length as u16).encode(&mut buf);

        for index in 0..self.attributes.len() {
            match self.attributes[index] {
                Attribute::MessageIntegrity(_) => {
                    let through = buf.len() - HEADER_SIZE + MESSAGE_INTEGRITY_ATTRIBUTE_SIZE;
                    let digest = integrity::hmac_sha1(
                        &self.password,
                        &with_length(&buf, through),
                    );
                    self.attributes[index] = Attribute::MessageIntegrity(digest);
                }
                Attribute::Fingerprint(_) => {
                    self.attributes[index] = Attribute::Fingerprint(integrity::fingerprint(&buf));
                }
                _ => {}
            }
            self.attributes[index].encode(&mut buf, &self.transaction_id)?;
        }

        let bytes = buf.freeze();
        self.wire = Some(bytes.clone());
        Ok(bytes)
    }

    /// Parse a complete message.
    ///
    /// Validation is streaming: each attribute is checked against the
    /// ordering rules and the declared length as soon as it is read.
    pub fn deserialize(data: Bytes) -> Result<Self, StunError> {
        let mut buf = data.clone();
        let header = StunHeader::decode(&mut buf)?;

        let declared = header.length as usize;
        if declared % 4 != 0 || buf.remaining() != declared {
            return Err(StunError::Length {
                declared,
                actual: buf.remaining(),
            });
        }

        let mut message = Message::new(header.class, header.method, header.transaction_id);
        let mut have_integrity = false;
        let mut have_fingerprint = false;

        while buf.has_remaining() {
            let offset = data.len() - buf.remaining();
            let attribute = Attribute::decode(&mut buf, &message.transaction_id)?;

            if have_fingerprint {
                return Err(StunError::AfterFingerprint);
            }
            if have_integrity && !matches!(attribute, Attribute::Fingerprint(_)) {
                return Err(StunError::AfterIntegrity);
            }
            if let Attribute::Fingerprint(received) = attribute {
                let computed = integrity::fingerprint(&data[..offset]);
                if received != computed {
                    return Err(StunError::Fingerprint { received, computed });
                }
            }

            have_integrity |= matches!(attribute, Attribute::MessageIntegrity(_));
            have_fingerprint |= matches!(attribute, Attribute::Fingerprint(_));

            message.append_attribute(attribute);
            if message.length > declared {
                return Err(StunError::Length {
                    declared,
                    actual: message.length,
                });
            }
        }

        message.wire = Some(data);
        Ok(message)
    }

    /// Bytes covered by MESSAGE-INTEGRITY, with the length field rewritten.
    fn integrity_input(&self) -> Result<Option<BytesMut>, StunError> {
        if self.length_for_message_integrity == 0 {
            return Ok(None);
        }
        let end = HEADER_SIZE + self.length_for_message_integrity - MESSAGE_INTEGRITY_ATTRIBUTE_SIZE;

        if let Some(wire) = self.wire.as_ref().filter(|wire| wire.len() >= end) {
            return Ok(Some(with_length(
                &wire[..end],
                self.length_for_message_integrity,
            )));
        }

        let mut buf = BytesMut::with_capacity(end);
        self.header(self.length_for_message_integrity as u16)
            .encode(&mut buf);
        for attribute in &self.attributes {
            if buf.len() >= end {
                break;
            }
            attribute.encode(&mut buf, &self.transaction_id)?;
        }
        Ok(Some(buf))
    }

    /// Recompute MESSAGE-INTEGRITY with `password`; `None` if absent.
    pub fn compute_message_integrity(
        &self,
        password: &str,
    ) -> Option<[u8; MESSAGE_INTEGRITY_SIZE]> {
        match self.integrity_input() {
            Ok(input) => input.map(|input| integrity::hmac_sha1(password, &input)),
            Err(e) => {
                debug!("Cannot rebuild integrity input: {}", e);
                None
            }
        }
    }

    /// Check the last MESSAGE-INTEGRITY against `password`.
    ///
    /// Returns false when the message carries no MESSAGE-INTEGRITY.
    pub fn verify_message_integrity(&self, password: &str) -> bool {
        let digest = self.attributes.iter().rev().find_map(|attribute| match attribute {
            Attribute::MessageIntegrity(digest) => Some(digest),
            _ => None,
        });
        let Some(digest) = digest else {
            return false;
        };

        match self.integrity_input() {
            Ok(Some(input)) => integrity::verify_hmac_sha1(password, &input, digest),
            Ok(None) => false,
            Err(e) => {
                debug!("Cannot rebuild integrity input: {}", e);
                false
            }
        }
    }

    /// Recompute FINGERPRINT over the bytes preceding the last one
    pub fn compute_fingerprint(&self) -> Option<u32> {
        let wire = self.wire.as_ref()?;
        let end = HEADER_SIZE + self.length.checked_sub(ATTRIBUTE_HEADER_SIZE + 4)?;
        if !self.has_fingerprint() || wire.len() < end {
            return None;
        }
        Some(integrity::fingerprint(&wire[..end]))
    }

    /// Unrecognised attribute types in the comprehension-required range
    pub fn unknown_comprehension_required_attributes(&self) -> Vec<u16> {
        self.attributes
            .iter()
            .filter_map(|attribute| match attribute {
                Attribute::Unknown { attribute_type, .. } if *attribute_type < 0x8000 => {
                    Some(*attribute_type)
                }
                _ => None,
            })
            .collect()
    }

    /// Reflexive address, preferring XOR-MAPPED-ADDRESS; last occurrence wins
    pub fn get_mapped_address(&self) -> Option<SocketAddr> {
        self.last(|attribute| match attribute {
            Attribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
        .or_else(|| {
            self.last(|attribute| match attribute {
                Attribute::MappedAddress(addr) => Some(*addr),
                _ => None,
            })
        })
    }

    /// ICE priority
    pub fn get_priority(&self) -> Option<u32> {
        self.last(|attribute| match attribute {
            Attribute::Priority(priority) => Some(*priority),
            _ => None,
        })
    }

    /// USERNAME
    pub fn get_username(&self) -> Option<&str> {
        self.last(|attribute| match attribute {
            Attribute::Username(username) => Some(username.as_str()),
            _ => None,
        })
    }

    /// True if MESSAGE-INTEGRITY is present
    pub fn has_message_integrity(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::MessageIntegrity(_)))
    }

    /// True if ERROR-CODE is present
    pub fn has_error_code(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::ErrorCode { .. }))
    }

    /// Numeric error code
    pub fn get_error_code(&self) -> Option<u16> {
        self.last(|attribute| match attribute {
            Attribute::ErrorCode { code, .. } => Some(*code),
            _ => None,
        })
    }

    /// Error reason phrase
    pub fn get_error_reason(&self) -> Option<&str> {
        self.last(|attribute| match attribute {
            Attribute::ErrorCode { reason, .. } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// True if UNKNOWN-ATTRIBUTES is present
    pub fn has_unknown_attributes(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::UnknownAttributes(_)))
    }

    /// Types listed in UNKNOWN-ATTRIBUTES
    pub fn get_unknown_attributes(&self) -> Option<&[u16]> {
        self.last(|attribute| match attribute {
            Attribute::UnknownAttributes(types) => Some(types.as_slice()),
            _ => None,
        })
    }

    /// True if FINGERPRINT is present
    pub fn has_fingerprint(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::Fingerprint(_)))
    }

    /// True if ICE-CONTROLLED is present
    pub fn has_ice_controlled(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::IceControlled(_)))
    }

    /// True if ICE-CONTROLLING is present
    pub fn has_ice_controlling(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::IceControlling(_)))
    }

    /// True if USE-CANDIDATE is present
    pub fn has_use_candidate(&self) -> bool {
        self.has(|attribute| matches!(attribute, Attribute::UseCandidate))
    }

    /// Sender's GUID prefix
    pub fn get_guid_prefix(&self) -> Option<[u8; 12]> {
        self.last(|attribute| match attribute {
            Attribute::GuidPrefix(prefix) => Some(*prefix),
            _ => None,
        })
    }

    fn has(&self, predicate: impl Fn(&Attribute) -> bool) -> bool {
        self.attributes.iter().any(predicate)
    }

    fn last<'a, T>(&'a self, select: impl Fn(&'a Attribute) -> Option<T>) -> Option<T> {
        self.attributes.iter().rev().find_map(select)
    }
}

/// Copy of `bytes` with the header length field set to `length`
fn with_length(bytes: &[u8], length: usize) -> BytesMut {
    let mut copy = BytesMut::from(bytes);
    copy[2..4].copy_from_slice(&(length as u16).to_be_bytes());
    copy
}
