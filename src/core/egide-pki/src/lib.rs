//! # Egide PKI Engine
//!
//! A minimal internal Certificate Authority: a self-signed root bootstrapped
//! once per vault, used to issue short-lived client certificates to
//! authenticating agents. The root's private key is never held in memory
//! longer than a single issuance call — it is re-derived from the live
//! master key and the encrypted-at-rest key material on every use.
//!
//! ## Features
//!
//! - Root Certificate Authority bootstrap
//! - Agent client certificate issuance
//! - Certificate revocation (in-memory set, persisted to storage)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

use std::path::Path;
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use egide_seal::SealHandle;
use egide_storage::StorageBackend;
use egide_storage_sqlite::SqliteBackend;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::info;

pub use error::PkiError;

const ROOT_KEY_WRAP_AAD: &[u8] = b"egide-pki-root-key";
const ROOT_CA_VALIDITY_DAYS: i64 = 3650;

mod keys {
    pub const ROOT_CERT_PEM: &str = "pki_root_cert_pem";
    pub const ROOT_KEY_CIPHERTEXT: &str = "pki_root_key_ciphertext";
}

/// Why a certificate was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// The owning agent was revoked.
    AgentRevoked,
    /// The private key is believed to be compromised.
    Compromised,
    /// Replaced by a newly issued certificate.
    Superseded,
}

/// The vault's root certificate, returned once on bootstrap.
#[derive(Debug, Clone)]
pub struct RootCertificate {
    /// PEM-encoded root certificate.
    pub certificate_pem: String,
    /// Hex-encoded SHA-256 fingerprint of the root certificate.
    pub fingerprint: String,
}

/// A freshly issued leaf certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded leaf certificate.
    pub certificate_pem: String,
    /// PEM-encoded private key, returned once to the caller.
    pub private_key_pem: String,
    /// Hex-encoded SHA-256 fingerprint of the leaf certificate.
    pub fingerprint: String,
}

/// Owns the root CA's encrypted key material and the revocation set.
pub struct CertificateAuthority {
    storage: SqliteBackend,
    seal: SealHandle,
    revoked: DashMap<String, RevocationReason>,
}

impl CertificateAuthority {
    /// Opens (creating if necessary) the PKI store at `data_path`.
    pub async fn open(data_path: impl AsRef<Path>, seal: SealHandle) -> Result<Self, PkiError> {
        let storage = SqliteBackend::open(data_path, "pki").await?;
        let ca = Self {
            storage,
            seal,
            revoked: DashMap::new(),
        };
        ca.migrate().await?;
        ca.load_revocations().await?;
        Ok(ca)
    }

    async fn migrate(&self) -> Result<(), PkiError> {
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS revoked_certificates (
                    fingerprint TEXT PRIMARY KEY,
                    reason      TEXT NOT NULL,
                    revoked_at  INTEGER NOT NULL
                )
                "#,
            )
            .await?;
        Ok(())
    }

    async fn load_revocations(&self) -> Result<(), PkiError> {
        let rows: Vec<RevocationRow> = self
            .storage
            .query_all("SELECT fingerprint, reason, revoked_at FROM revoked_certificates", &[])
            .await?;
        for row in rows {
            self.revoked.insert(row.fingerprint, parse_reason(&row.reason));
        }
        Ok(())
    }

    /// Whether the root CA has been bootstrapped.
    pub async fn is_bootstrapped(&self) -> Result<bool, PkiError> {
        Ok(self.storage.get(keys::ROOT_CERT_PEM).await?.is_some())
    }

    /// Generates the self-signed root certificate and encrypts its private
    /// key under the live master key. Fails with [`PkiError::InvalidRequest`]
    /// if the CA was already bootstrapped.
    pub async fn bootstrap(&self) -> Result<RootCertificate, PkiError> {
        if self.is_bootstrapped().await? {
            return Err(PkiError::InvalidRequest(
                "certificate authority already bootstrapped".to_string(),
            ));
        }

        let key_pair = KeyPair::generate()?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Egide Root CA");

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(ROOT_CA_VALIDITY_DAYS);

        let cert = params.self_signed(&key_pair)?;
        let certificate_pem = cert.pem();
        let fingerprint = fingerprint_of(cert.der());

        let key_der = key_pair.serialize_der();
        let mk_bytes = self
            .seal
            .with_master_key(|mk| mk.as_bytes().to_vec())
            .await?;
        let wrapped_key = egide_crypto::aead::encrypt(&mk_bytes, &key_der, Some(ROOT_KEY_WRAP_AAD))?;

        self.storage
            .put(keys::ROOT_CERT_PEM, certificate_pem.as_bytes())
            .await?;
        self.storage
            .put(keys::ROOT_KEY_CIPHERTEXT, &wrapped_key)
            .await?;

        info!(fingerprint = %fingerprint, "root certificate authority bootstrapped");

        Ok(RootCertificate {
            certificate_pem,
            fingerprint,
        })
    }

    /// Issues a short-lived client certificate for `subject`, signed by the
    /// root CA.
    pub async fn issue_agent_certificate(
        &self,
        subject: &str,
        validity: StdDuration,
    ) -> Result<IssuedCertificate, PkiError> {
        let issuer = self.load_issuer().await?;

        let key_pair = KeyPair::generate()?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, subject);

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::seconds(validity.as_secs() as i64);

        let cert = params.signed_by(&key_pair, &issuer)?;
        let certificate_pem = cert.pem();
        let private_key_pem = key_pair.serialize_pem();
        let fingerprint = fingerprint_of(cert.der());

        info!(subject, fingerprint = %fingerprint, "issued agent certificate");

        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem,
            fingerprint,
        })
    }

    async fn load_issuer(&self) -> Result<Issuer<'static, KeyPair>, PkiError> {
        let cert_pem_bytes = self
            .storage
            .get(keys::ROOT_CERT_PEM)
            .await?
            .ok_or(PkiError::CaNotInitialized)?;
        let cert_pem = String::from_utf8(cert_pem_bytes)
            .map_err(|e| PkiError::Storage(format!("corrupt root certificate: {e}")))?;

        let wrapped_key = self
            .storage
            .get(keys::ROOT_KEY_CIPHERTEXT)
            .await?
            .ok_or(PkiError::CaNotInitialized)?;
        let mk_bytes = self
            .seal
            .with_master_key(|mk| mk.as_bytes().to_vec())
            .await?;
        let key_der = egide_crypto::aead::decrypt(&mk_bytes, &wrapped_key, Some(ROOT_KEY_WRAP_AAD))?;
        let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&key_der.into(), &PKCS_ECDSA_P256_SHA256)?;

        Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| PkiError::Storage(format!("failed to load issuer: {e}")))
    }

    /// Marks `fingerprint` as revoked, persisting the decision.
    pub async fn revoke(&self, fingerprint: &str, reason: RevocationReason) -> Result<(), PkiError> {
        self.storage
            .execute(
                "INSERT OR REPLACE INTO revoked_certificates (fingerprint, reason, revoked_at) VALUES (?, ?, ?)",
                &[fingerprint, reason_str(reason), &now().to_string()],
            )
            .await?;
        self.revoked.insert(fingerprint.to_string(), reason);
        Ok(())
    }

    /// Whether `fingerprint` has been revoked.
    pub fn is_revoked(&self, fingerprint: &str) -> bool {
        self.revoked.contains_key(fingerprint)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RevocationRow {
    fingerprint: String,
    reason: String,
    #[allow(dead_code)]
    revoked_at: i64,
}

fn reason_str(reason: RevocationReason) -> &'static str {
    match reason {
        RevocationReason::AgentRevoked => "agent_revoked",
        RevocationReason::Compromised => "compromised",
        RevocationReason::Superseded => "superseded",
    }
}

fn parse_reason(s: &str) -> RevocationReason {
    match s {
        "compromised" => RevocationReason::Compromised,
        "superseded" => RevocationReason::Superseded,
        _ => RevocationReason::AgentRevoked,
    }
}

fn fingerprint_of(der: &rcgen::CertificateDer<'_>) -> String {
    let digest = Sha256::digest(der.as_ref());
    hex_encode(digest)
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let bytes = bytes.as_ref();
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
}
