//! Vault runtime configuration, loaded from a `toml` file.
//!
//! Everything here is optional — a vault with no config file at all runs
//! with the defaults below (derive-from-MK audit signing, no auto-unseal,
//! a five-minute unseal progress window).

use std::path::Path;

use egide_audit::AuditSigningKeySource;
use serde::Deserialize;

const DEFAULT_UNSEAL_PROGRESS_TTL_SECONDS: u64 = 300;

/// Top-level vault configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Storage connection string for the active backend. `None` selects the
    /// tenant-isolated SQLite backend rooted at the server's `--data-dir`.
    pub storage_url: Option<String>,
    /// Where the audit log's HMAC signing key comes from.
    pub audit_signing_key_source: AuditSigningKeySourceConfig,
    /// Auto-unseal provider configuration.
    pub auto_unseal: AutoUnsealConfig,
    /// Seal actor tuning.
    pub seal: SealConfig,
}

impl VaultConfig {
    /// Loads configuration from `path`. A missing file is not an error —
    /// the vault falls back to defaults, matching the teacher's dev-mode
    /// convenience of running without any config file on disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Configuration form of [`AuditSigningKeySource`]; `Static`'s key is
/// hex-encoded in the config file, never stored as raw bytes on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditSigningKeySourceConfig {
    /// HKDF-derive the signing key from the live master key.
    DeriveFromMk,
    /// Use a fixed operator-supplied key, hex-encoded.
    Static {
        /// Hex-encoded signing key.
        key_hex: String,
    },
}

impl Default for AuditSigningKeySourceConfig {
    fn default() -> Self {
        Self::DeriveFromMk
    }
}

impl AuditSigningKeySourceConfig {
    /// Resolves this config value into the real [`AuditSigningKeySource`].
    pub fn resolve(&self) -> anyhow::Result<AuditSigningKeySource> {
        match self {
            Self::DeriveFromMk => Ok(AuditSigningKeySource::DeriveFromMk),
            Self::Static { key_hex } => Ok(AuditSigningKeySource::Static(decode_hex(key_hex)?)),
        }
    }
}

/// Auto-unseal provider selection. Providers other than `none` are
/// accepted but not wired to a real KMS SDK (out of scope).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutoUnsealConfig {
    /// Provider name (`"none"`, `"aws_kms"`, `"gcp_kms"`, `"azure_key_vault"`).
    pub provider: Option<String>,
}

/// Seal actor tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// How long an in-progress unseal attempt may sit idle before its
    /// submitted shares are discarded.
    pub unseal_progress_ttl_seconds: u64,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            unseal_progress_ttl_seconds: DEFAULT_UNSEAL_PROGRESS_TTL_SECONDS,
        }
    }
}

fn decode_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        anyhow::bail!("hex string must have an even length");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = VaultConfig::load(Path::new("/nonexistent/egide.toml")).unwrap();
        assert_eq!(config.seal.unseal_progress_ttl_seconds, 300);
        assert!(config.storage_url.is_none());
    }

    #[test]
    fn decodes_static_signing_key() {
        let source = AuditSigningKeySourceConfig::Static {
            key_hex: "deadbeef".to_string(),
        };
        match source.resolve().unwrap() {
            AuditSigningKeySource::Static(bytes) => assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]),
            _ => panic!("expected static key"),
        }
    }
}
