//! HMAC-SHA256 signing.
//!
//! Used by the audit log to sign each hash-chain entry with a key derived
//! from the master key (or a statically configured key).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Size of an HMAC-SHA256 signature in bytes.
pub const SIGNATURE_SIZE: usize = 32;

/// Signs `message` with `key`, returning a 32-byte HMAC-SHA256 tag.
pub fn sign(key: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::SignatureFailed(e.to_string()))?;
    mac.update(message);
    let mut out = [0u8; SIGNATURE_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verifies `signature` over `message` under `key` in constant time.
pub fn verify(key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let expected = sign(key, message)?;
    if expected.ct_eq(signature).into() {
        Ok(())
    } else {
        Err(CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = b"a signing key of arbitrary length";
        let msg = b"audit-entry-hash";
        let sig = sign(key, msg).unwrap();
        assert!(verify(key, msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = b"a signing key";
        let sig = sign(key, b"original").unwrap();
        assert!(verify(key, b"tampered", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let sig = sign(b"key-one", b"message").unwrap();
        assert!(verify(b"key-two", b"message", &sig).is_err());
    }

    #[test]
    fn signatures_are_deterministic() {
        let key = b"key";
        let msg = b"message";
        assert_eq!(sign(key, msg).unwrap(), sign(key, msg).unwrap());
    }
}
