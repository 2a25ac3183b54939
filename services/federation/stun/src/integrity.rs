//! MESSAGE-INTEGRITY and FINGERPRINT primitives.

use crate::attribute::MESSAGE_INTEGRITY_SIZE;
use crate::header::FINGERPRINT_XOR;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1 of `data` keyed with `password` (short-term credential).
pub fn hmac_sha1(password: &str, data: &[u8]) -> [u8; MESSAGE_INTEGRITY_SIZE] {
    let mut mac = new_mac(password);
    mac.update(data);
    let mut digest = [0u8; MESSAGE_INTEGRITY_SIZE];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    digest
}

/// Constant-time check of a received digest.
pub fn verify_hmac_sha1(password: &str, data: &[u8], digest: &[u8]) -> bool {
    let mut mac = new_mac(password);
    mac.update(data);
    mac.verify_slice(digest).is_ok()
}

fn new_mac(password: &str) -> HmacSha1 {
    // HMAC accepts keys of any length, including empty ones.
    <HmacSha1 as Mac>::new_from_slice(password.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac takes keys of any length"))
}

/// CRC-32 of `data` XOR 0x5354554E
pub fn fingerprint(data: &[u8]) -> u32 {
    crc32fast::hash(data) ^ FINGERPRINT_XOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha1_rfc2202_vector() {
        // RFC 2202 test case 2
        let digest = hmac_sha1("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            [
                0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5, 0xf1,
                0x84, 0xdf, 0x9c, 0x25, 0x9a, 0x7c, 0x79
            ]
        );
        assert!(verify_hmac_sha1("Jefe", b"what do ya want for nothing?", &digest));
        assert!(!verify_hmac_sha1("jefe", b"what do ya want for nothing?", &digest));
    }

    #[test]
    fn test_empty_password() {
        let digest = hmac_sha1("", b"anonymous");
        assert!(verify_hmac_sha1("", b"anonymous", &digest));
    }

    #[test]
    fn test_fingerprint_xor() {
        // CRC-32 of "123456789" is 0xCBF43926
        assert_eq!(fingerprint(b"123456789"), 0xCBF4_3926 ^ 0x5354_554E);
    }
}
