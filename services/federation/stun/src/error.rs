//! STUN codec and dispatch error types.

use thiserror::Error;

/// STUN protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StunError {
    /// Input ended before the declared content was available
    #[error("incomplete message")]
    Incomplete,

    /// The two most significant bits of the message type were not zero
    #[error("reserved type bits nonzero: 0x{0:04x}")]
    Reserved(u16),

    /// Magic cookie did not match 0x2112A442
    #[error("bad magic cookie: 0x{0:08x}")]
    MagicCookie(u32),

    /// Declared message length disagrees with the bytes present
    #[error("length mismatch: declared {declared}, actual {actual}")]
    Length {
        /// Length carried in the header
        declared: usize,
        /// Length observed while parsing
        actual: usize,
    },

    /// Attribute length is wrong for its fixed-size kind
    #[error("bad length {length} for attribute 0x{attribute_type:04x}")]
    AttributeLength {
        /// Attribute type code
        attribute_type: u16,
        /// Declared content length
        length: u16,
    },

    /// Variable-length attribute exceeds its maximum size
    #[error("attribute 0x{attribute_type:04x} too long: {length} > {max}")]
    TooLong {
        /// Attribute type code
        attribute_type: u16,
        /// Content length
        length: usize,
        /// Largest permitted content length
        max: usize,
    },

    /// Unknown address family in a (XOR-)MAPPED-ADDRESS
    #[error("unknown address family 0x{0:02x}")]
    Family(u8),

    /// ERROR-CODE outside 300..=699 or with a number >= 100
    #[error("invalid error code class {class} number {number}")]
    ErrorClass {
        /// Hundreds digit
        class: u8,
        /// Remainder
        number: u8,
    },

    /// Text attribute was not valid UTF-8
    #[error("invalid utf-8 in attribute 0x{0:04x}")]
    Utf8(u16),

    /// An attribute followed FINGERPRINT
    #[error("attribute after fingerprint")]
    AfterFingerprint,

    /// Something other than FINGERPRINT followed MESSAGE-INTEGRITY
    #[error("attribute after message integrity")]
    AfterIntegrity,

    /// FINGERPRINT did not match the recomputed CRC
    #[error("fingerprint mismatch: received 0x{received:08x}, computed 0x{computed:08x}")]
    Fingerprint {
        /// Value carried in the message
        received: u32,
        /// Value computed over the preceding bytes
        computed: u32,
    },

    /// Attribute kind cannot be written (content was discarded on decode)
    #[error("cannot serialize attribute 0x{0:04x}")]
    Unserializable(u16),

    /// Sender capability failed to hand off a message
    #[error("send failed: {0}")]
    Send(String),
}
