//! Wires every core engine into one running vault instance.
//!
//! `Vault::bootstrap` is the single place that knows the construction order:
//! seal before audit (audit signs with a key derived from the master key),
//! audit before everything else (every engine logs through it), policy
//! before secrets (secrets delegates access checks to it), PKI before the
//! agent registry (agents are issued certificates by it).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use egide_audit::{AuditHandle, AuditLog};
use egide_auth::{AgentRegistry, AppRoleBackend};
use egide_leases::LeaseManager;
use egide_pki::CertificateAuthority;
use egide_policy::PolicyStore;
use egide_rotation::RotationDispatcher;
use egide_seal::{SealHandle, SealManager, SealStatus};
use egide_secrets::SecretStore;

use crate::config::VaultConfig;

/// How often background sweeps (lease expiry, rotation dispatch) run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A fully wired vault: every core engine plus the background tasks that
/// keep leases and rotations moving without an explicit caller.
pub struct Vault {
    /// Seal/unseal actor handle.
    pub seal: SealHandle,
    /// Audit log actor handle.
    pub audit: AuditHandle,
    /// Versioned, envelope-encrypted secret store.
    pub secrets: SecretStore,
    /// Policy store used for direct policy administration (a second handle
    /// onto the same storage `secrets` uses internally for access checks).
    pub policy: PolicyStore,
    /// Dynamic lease manager.
    pub leases: Arc<LeaseManager>,
    /// Root certificate authority.
    pub pki: Arc<CertificateAuthority>,
    /// Agent/AppRole registry.
    pub agents: Arc<AgentRegistry>,
    /// AppRole authentication backend built over `agents`.
    pub approle_backend: Arc<AppRoleBackend>,
    /// Cron-driven rotation dispatcher.
    pub rotation: Arc<RotationDispatcher>,
}

impl Vault {
    /// Constructs every engine rooted at `data_dir` and starts the
    /// background sweep tasks. In `dev_mode`, an uninitialized vault is
    /// auto-unsealed with a single-share Shamir config, mirroring the
    /// teacher's dev-mode convenience.
    pub async fn bootstrap(
        data_dir: &Path,
        dev_mode: bool,
        config: &VaultConfig,
    ) -> anyhow::Result<Self> {
        let mut seal_manager = SealManager::with_unseal_progress_ttl(
            data_dir,
            Duration::from_secs(config.seal.unseal_progress_ttl_seconds),
        )
        .await?;

        if dev_mode && seal_manager.status() == SealStatus::Uninitialized {
            seal_manager.enable_dev_mode().await?;
        }

        let seal = SealHandle::spawn(seal_manager);

        let signing_key_source = config.audit_signing_key_source.resolve()?;
        let audit_log =
            AuditLog::with_signing_key_source(data_dir, signing_key_source, Some(seal.clone()))
                .await?;
        let audit = AuditHandle::spawn(audit_log);

        // Two independent handles onto the same on-disk policy table: one
        // consumed by the secret store for access checks, one kept here for
        // direct policy administration.
        let policy_for_secrets = PolicyStore::open(data_dir).await?;
        let policy = PolicyStore::open(data_dir).await?;

        let secrets =
            SecretStore::open(data_dir, seal.clone(), policy_for_secrets, audit.clone()).await?;

        let leases = Arc::new(LeaseManager::open(data_dir, audit.clone()).await?);

        let pki = Arc::new(CertificateAuthority::open(data_dir, seal.clone()).await?);
        if !pki.is_bootstrapped().await? {
            pki.bootstrap().await?;
        }

        let agents = Arc::new(
            AgentRegistry::open(data_dir, seal.clone(), Arc::clone(&pki), audit.clone()).await?,
        );
        let approle_backend = Arc::new(AppRoleBackend::new(Arc::clone(&agents)));

        let rotation = Arc::new(RotationDispatcher::open(data_dir, audit.clone()).await?);

        let vault = Self {
            seal,
            audit,
            secrets,
            policy,
            leases,
            pki,
            agents,
            approle_backend,
            rotation,
        };

        vault.spawn_background_tasks();

        Ok(vault)
    }

    /// Spawns the lease-expiry sweep and rotation dispatch loops. Both are
    /// best-effort: a failed tick logs a warning and retries on the next
    /// interval rather than taking the vault down.
    fn spawn_background_tasks(&self) {
        let leases = Arc::clone(&self.leases);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                match leases.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(swept = n, "lease sweep revoked expired leases"),
                    Err(error) => tracing::warn!(%error, "lease sweep failed"),
                }
            }
        });

        let rotation = Arc::clone(&self.rotation);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                match rotation.dispatch_due().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(dispatched = n, "rotation schedules fired"),
                    Err(error) => tracing::warn!(%error, "rotation dispatch failed"),
                }
            }
        });
    }
}
