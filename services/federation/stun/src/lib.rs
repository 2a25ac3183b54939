//! STUN message codec and binding dispatcher for federation connectivity checks.
//!
//! This crate provides the byte-level STUN implementation used by ICE
//! connectivity checks between federated repositories: attribute encoding,
//! message framing with MESSAGE-INTEGRITY and FINGERPRINT, and a stateless
//! participant that answers binding requests.
//!
//! ## Features
//!
//! - **Bit-exact framing**: RFC 5389 header with packed class/method type
//! - **Typed attributes**: one enum variant per attribute kind, unknown kinds skipped
//! - **Integrity**: HMAC-SHA1 short-term credentials, CRC-32 fingerprints
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for parsing and encoding
//! - **Injected I/O**: responses leave through a [`StunSender`] capability
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u16 message type     | 2 zero bits + class/method |
//! +----------------------+----------------------------+
//! | u16 length           | attribute bytes that follow|
//! +----------------------+----------------------------+
//! | u32 magic cookie     | 0x2112A442                 |
//! +----------------------+----------------------------+
//! | transaction id (12B) | correlation key            |
//! +----------------------+----------------------------+
//! | attributes           | u16 type, u16 length,      |
//! |                      | content, pad to 4 bytes    |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod error;
pub mod header;
pub mod integrity;
pub mod message;
pub mod participant;

// Re-export main types
pub use attribute::{Attribute, MAX_REASON_SIZE, MAX_USERNAME_SIZE};
pub use error::StunError;
pub use header::{Class, Method, StunHeader, TransactionId, HEADER_SIZE, MAGIC_COOKIE};
pub use message::Message;
pub use participant::{
    classify, Credentials, Disposition, Inbound, NullObserver, Participant, ParticipantConfig,
    StunObserver, StunSender,
};
