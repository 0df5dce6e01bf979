//! Shamir's Secret Sharing over GF(2^8).
//!
//! Splits a 32-byte master key into `n` shares such that any `k` reconstruct
//! it, and fewer than `k` reveal no information about it. The field
//! arithmetic is provided by `blahaj`; this module only adds the wire
//! encoding a key holder actually handles.

use std::collections::HashSet;

use blahaj::{Share as SharkShare, Sharks};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Human-readable prefix for encoded shares.
const SHARE_PREFIX: &str = "secrethub-share-";

/// Length in bytes of the share checksum suffix.
const CHECKSUM_LEN: usize = 4;

/// A single Shamir share, encoded for transport.
///
/// Wire format (before base32): `x_coord (1 byte) || y (32 bytes) ||
/// checksum (4 bytes, first 4 bytes of SHA-256(x || y))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShamirShare {
    /// The share's x-coordinate (1-based index).
    pub x: u8,
    raw: Vec<u8>,
}

impl ShamirShare {
    /// Returns the share's x-coordinate.
    pub fn index(&self) -> u8 {
        self.x
    }

    /// Encodes the share as `"secrethub-share-" || base32(x || y || checksum)`.
    pub fn encode(&self) -> String {
        let y = self.y_bytes();
        let mut payload = Vec::with_capacity(1 + y.len() + CHECKSUM_LEN);
        payload.push(self.x);
        payload.extend_from_slice(y);
        payload.extend_from_slice(&checksum(self.x, y));

        format!(
            "{SHARE_PREFIX}{}",
            base32::encode(base32::Alphabet::RFC4648 { padding: false }, &payload)
        )
    }

    /// Decodes a share previously produced by [`ShamirShare::encode`].
    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let body = encoded
            .strip_prefix(SHARE_PREFIX)
            .ok_or_else(|| CryptoError::BadShare("missing share prefix".into()))?;

        let payload = base32::decode(base32::Alphabet::RFC4648 { padding: false }, body)
            .ok_or_else(|| CryptoError::BadShare("invalid base32 encoding".into()))?;

        if payload.len() < 1 + CHECKSUM_LEN {
            return Err(CryptoError::BadShare("share too short".into()));
        }

        let (head, tail) = payload.split_at(payload.len() - CHECKSUM_LEN);
        let x = head[0];
        let y = &head[1..];

        if tail != checksum(x, y) {
            return Err(CryptoError::BadShare("checksum mismatch".into()));
        }

        let mut raw = Vec::with_capacity(head.len());
        raw.extend_from_slice(head);

        Ok(Self { x, raw })
    }

    fn y_bytes(&self) -> &[u8] {
        &self.raw[1..]
    }

    fn to_shark(&self) -> Result<SharkShare, CryptoError> {
        SharkShare::try_from(self.raw.as_slice())
            .map_err(|_| CryptoError::BadShare("malformed share data".into()))
    }
}

fn checksum(x: u8, y: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([x]);
    hasher.update(y);
    let digest = hasher.finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Splits a 32-byte secret into `n` shares, `k` of which reconstruct it.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidInput`] if `1 <= k <= n <= 255` does not
/// hold, or if `secret` is not 32 bytes.
pub fn split(secret: &[u8], n: u8, k: u8) -> Result<Vec<ShamirShare>, CryptoError> {
    if secret.len() != 32 {
        return Err(CryptoError::InvalidInput(
            "secret must be 32 bytes".to_string(),
        ));
    }
    if k == 0 || n == 0 || k > n {
        return Err(CryptoError::InvalidInput(
            "require 1 <= k <= n <= 255".to_string(),
        ));
    }

    let sharks = Sharks(k);
    let dealer = sharks.dealer(secret);

    Ok(dealer
        .take(n as usize)
        .map(|s| {
            let raw: Vec<u8> = (&s).into();
            ShamirShare { x: raw[0], raw }
        })
        .collect())
}

/// Reconstructs the original 32-byte secret from at least `threshold`
/// distinct shares.
///
/// # Errors
///
/// - [`CryptoError::DuplicateShare`] if two shares share an x-coordinate.
/// - [`CryptoError::InsufficientShares`] if fewer than `threshold` distinct
///   shares are supplied.
pub fn reconstruct(shares: &[ShamirShare], threshold: u8) -> Result<[u8; 32], CryptoError> {
    let mut seen = HashSet::new();
    for share in shares {
        if !seen.insert(share.x) {
            return Err(CryptoError::DuplicateShare(share.x));
        }
    }

    if shares.len() < threshold as usize {
        return Err(CryptoError::InsufficientShares {
            needed: threshold,
            got: shares.len() as u8,
        });
    }

    let shark_shares = shares
        .iter()
        .map(ShamirShare::to_shark)
        .collect::<Result<Vec<_>, _>>()?;

    let sharks = Sharks(threshold);
    let secret = sharks
        .recover(&shark_shares)
        .map_err(|_| CryptoError::BadShare("reconstruction failed".to_string()))?;

    let mut out = [0u8; 32];
    if secret.len() != 32 {
        return Err(CryptoError::BadShare(
            "reconstructed secret has unexpected length".to_string(),
        ));
    }
    out.copy_from_slice(&secret);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;

    fn secret32(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn split_reconstruct_roundtrip_all_subsets() {
        for (n, k) in [(5u8, 3u8), (3, 1), (1, 1), (10, 10), (7, 4)] {
            let secret = secret32(0x42);
            let shares = split(&secret, n, k).unwrap();
            assert_eq!(shares.len(), n as usize);

            // every k-subset reconstructs
            for start in 0..(n - k + 1) {
                let subset = &shares[start as usize..(start + k) as usize];
                let recovered = reconstruct(subset, k).unwrap();
                assert_eq!(recovered, secret, "n={n} k={k}");
            }
        }
    }

    #[test]
    fn fewer_than_threshold_fails() {
        let secret = secret32(7);
        let shares = split(&secret, 5, 3).unwrap();
        let result = reconstruct(&shares[..2], 3);
        assert!(matches!(
            result,
            Err(CryptoError::InsufficientShares { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn duplicate_share_rejected() {
        let secret = secret32(9);
        let shares = split(&secret, 5, 3).unwrap();
        let dup = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        let result = reconstruct(&dup, 3);
        assert!(matches!(result, Err(CryptoError::DuplicateShare(_))));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let secret = secret32(0xAB);
        let shares = split(&secret, 5, 3).unwrap();
        for share in &shares {
            let encoded = share.encode();
            assert!(encoded.starts_with(SHARE_PREFIX));
            let decoded = ShamirShare::decode(&encoded).unwrap();
            assert_eq!(decoded, *share);
        }
    }

    #[test]
    fn decode_rejects_bad_prefix() {
        let result = ShamirShare::decode("not-a-share-AAAA");
        assert!(matches!(result, Err(CryptoError::BadShare(_))));
    }

    #[test]
    fn decode_rejects_tampered_checksum() {
        let secret = secret32(1);
        let shares = split(&secret, 3, 2).unwrap();
        let mut encoded = shares[0].encode();
        // Flip the last character to corrupt the checksum.
        let last = encoded.pop().unwrap();
        let replacement = if last == 'A' { 'B' } else { 'A' };
        encoded.push(replacement);

        let result = ShamirShare::decode(&encoded);
        assert!(matches!(result, Err(CryptoError::BadShare(_))));
    }

    #[test]
    fn shares_are_unique_x_coordinates() {
        let secret = secret32(3);
        let shares = split(&secret, 10, 5).unwrap();
        let xs: Set<u8> = shares.iter().map(|s| s.x).collect();
        assert_eq!(xs.len(), shares.len());
    }

    #[test]
    fn invalid_params_rejected() {
        let secret = secret32(1);
        assert!(split(&secret, 3, 0).is_err());
        assert!(split(&secret, 2, 3).is_err());
        assert!(split(&[0u8; 16], 3, 2).is_err());
    }
}
