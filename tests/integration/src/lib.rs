//! Black-box workspace tests.
//!
//! These exercise the literal end-to-end scenarios from the vault's
//! testable-properties list by wiring the core engines together directly,
//! the same way `egide-server::Vault` does, rather than through a network
//! transport (the workspace carries none).

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use egide_audit::{AuditHandle, AuditLog, AuditSigningKeySource, SeqRange, ChainVerification};
    use egide_crypto::shamir::ShamirShare;
    use egide_leases::{DynamicEngine, Lease, LeaseAttrs, LeaseError, LeaseManager, LeaseStatus};
    use egide_policy::{Conditions, Effect, Operation, PolicyDocument, PolicyStore, RequestContext, Statement};
    use egide_seal::{SealManager, SealStatus, ShamirConfig};
    use egide_secrets::SecretStore;
    use egide_storage_sqlite::SqliteBackend;
    use tempfile::TempDir;

    fn static_audit_key() -> AuditSigningKeySource {
        AuditSigningKeySource::Static(b"integration-test-signing-key".to_vec())
    }

    async fn audit_handle(dir: &TempDir) -> AuditHandle {
        let log = AuditLog::with_signing_key_source(dir.path(), static_audit_key(), None)
            .await
            .unwrap();
        AuditHandle::spawn(log)
    }

    // ------------------------------------------------------------------
    // Scenario 1: Shamir init / partial unseal / reseal / re-unseal.
    // ------------------------------------------------------------------
    #[tokio::test]
    async fn scenario_init_unseal_reseal_reunseal() {
        let dir = TempDir::new().unwrap();
        let mut manager = SealManager::new(dir.path()).await.unwrap();

        let init = manager
            .initialize(ShamirConfig { shares: 5, threshold: 3 })
            .await
            .unwrap();
        assert_eq!(init.shares.len(), 5);

        let progress = manager.unseal(&init.shares[0]).await.unwrap();
        assert!(progress.sealed);
        assert_eq!(progress.progress, 1);

        let progress = manager.unseal(&init.shares[1]).await.unwrap();
        assert!(progress.sealed);
        assert_eq!(progress.progress, 2);

        let progress = manager.unseal(&init.shares[2]).await.unwrap();
        assert!(!progress.sealed);
        assert_eq!(manager.status(), SealStatus::Unsealed);

        manager.seal();
        assert_eq!(manager.status(), SealStatus::Sealed);

        let reorder: [&ShamirShare; 3] = [&init.shares[0], &init.shares[4], &init.shares[2]];
        let mut last = None;
        for share in reorder {
            last = Some(manager.unseal(share).await.unwrap());
        }
        assert!(!last.unwrap().sealed);
        assert_eq!(manager.status(), SealStatus::Unsealed);
    }

    // ------------------------------------------------------------------
    // Scenario 2: create + read a secret; ciphertext never carries plaintext.
    // ------------------------------------------------------------------
    #[tokio::test]
    async fn scenario_secret_ciphertext_hides_plaintext() {
        let seal_dir = TempDir::new().unwrap();
        let audit_dir = TempDir::new().unwrap();
        let secrets_dir = TempDir::new().unwrap();

        let mut manager = SealManager::new(seal_dir.path()).await.unwrap();
        manager.enable_dev_mode().await.unwrap();
        let seal = egide_seal::SealHandle::spawn(manager);

        let audit = audit_handle(&audit_dir).await;
        let policy = PolicyStore::open(secrets_dir.path()).await.unwrap();
        let secrets = SecretStore::open(secrets_dir.path(), seal, policy, audit)
            .await
            .unwrap();

        let data = serde_json::json!({ "username": "admin", "password": "s3cr3t" });
        let data_bytes = serde_json::to_vec(&data).unwrap();
        secrets
            .create("prod.db.pg.password", "kv", &data_bytes, serde_json::json!({}))
            .await
            .unwrap();

        #[derive(sqlx::FromRow)]
        struct CiphertextRow {
            ciphertext: String,
        }

        let raw = SqliteBackend::open(secrets_dir.path(), "secrets").await.unwrap();
        let row: Option<CiphertextRow> = raw
            .query_one(
                "SELECT ciphertext FROM secrets WHERE path = ?",
                &["prod.db.pg.password"],
            )
            .await
            .unwrap();
        let ciphertext_b64 = row.unwrap().ciphertext;
        let ciphertext = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &ciphertext_b64).unwrap();
        assert!(!contains_subslice(&ciphertext, b"s3cr3t"));

        let decrypted = secrets.read_decrypted("prod.db.pg.password").await.unwrap();
        let decrypted_value: serde_json::Value = serde_json::from_slice(&decrypted.data).unwrap();
        assert_eq!(decrypted_value, data);
    }

    fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    // ------------------------------------------------------------------
    // Scenario 3: version monotonicity, rollback, prune.
    // ------------------------------------------------------------------
    #[tokio::test]
    async fn scenario_update_rollback_prune() {
        let seal_dir = TempDir::new().unwrap();
        let audit_dir = TempDir::new().unwrap();
        let secrets_dir = TempDir::new().unwrap();

        let mut manager = SealManager::new(seal_dir.path()).await.unwrap();
        manager.enable_dev_mode().await.unwrap();
        let seal = egide_seal::SealHandle::spawn(manager);

        let audit = audit_handle(&audit_dir).await;
        let policy = PolicyStore::open(secrets_dir.path()).await.unwrap();
        let secrets = SecretStore::open(secrets_dir.path(), seal, policy, audit)
            .await
            .unwrap();

        let path = "app.cache.token";
        let v1 = serde_json::json!({ "password": "v1" });
        secrets
            .create(path, "kv", &serde_json::to_vec(&v1).unwrap(), serde_json::json!({}))
            .await
            .unwrap();

        for n in 2..=6 {
            let body = serde_json::json!({ "password": format!("n3w-{n}") });
            let record = secrets
                .update(path, &serde_json::to_vec(&body).unwrap())
                .await
                .unwrap();
            assert_eq!(record.version, n);
        }

        let record = secrets.rollback(path, 1).await.unwrap();
        assert_eq!(record.version, 7);
        let rolled_back = secrets.read_decrypted(path).await.unwrap();
        let rolled_back_value: serde_json::Value = serde_json::from_slice(&rolled_back.data).unwrap();
        assert_eq!(rolled_back_value, v1);

        let prune = secrets.prune_old_versions(path, 2, 0).await.unwrap();
        assert_eq!(prune.kept, 2);
    }

    // ------------------------------------------------------------------
    // Scenario 4: policy-gated access, audited.
    // ------------------------------------------------------------------
    #[tokio::test]
    async fn scenario_policy_gated_access_is_audited() {
        let seal_dir = TempDir::new().unwrap();
        let audit_dir = TempDir::new().unwrap();
        let secrets_dir = TempDir::new().unwrap();

        let mut manager = SealManager::new(seal_dir.path()).await.unwrap();
        manager.enable_dev_mode().await.unwrap();
        let seal = egide_seal::SealHandle::spawn(manager);

        let audit = audit_handle(&audit_dir).await;
        let policy_for_secrets = PolicyStore::open(secrets_dir.path()).await.unwrap();
        let secrets = SecretStore::open(secrets_dir.path(), seal, policy_for_secrets, audit.clone())
            .await
            .unwrap();

        secrets
            .create(
                "prod.db.pg.password",
                "kv",
                &serde_json::to_vec(&serde_json::json!({ "password": "s3cr3t" })).unwrap(),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let admin_policy = PolicyStore::open(secrets_dir.path()).await.unwrap();
        admin_policy
            .create_policy(
                "db-readers",
                PolicyDocument {
                    statements: vec![Statement {
                        path_pattern: "prod.db.*".to_string(),
                        operations: vec![Operation::Read],
                        effect: Effect::Allow,
                        conditions: Conditions::default(),
                    }],
                },
                vec!["agent-A".to_string()],
            )
            .await
            .unwrap();

        let ctx = RequestContext::at(chrono::Utc::now());

        let allowed = secrets
            .get_secret_for_entity("agent-A", "prod.db.pg.password", &ctx)
            .await;
        assert!(allowed.is_ok());

        let denied = secrets
            .get_secret_for_entity("agent-B", "prod.db.pg.password", &ctx)
            .await;
        assert!(denied.is_err());

        let entries = audit.entries(SeqRange::default()).await.unwrap();
        let access_events: Vec<_> = entries
            .iter()
            .filter(|e| e.event_type == "secret.access_denied" || e.event_type == "secret.created")
            .collect();
        let denial = entries
            .iter()
            .find(|e| e.event_type == "secret.access_denied")
            .expect("denial must be audited");
        assert!(!denial.access_granted);
        assert!(!access_events.is_empty());
    }

    // ------------------------------------------------------------------
    // Scenario 5: concurrent appends stay contiguous; tamper is detected.
    // ------------------------------------------------------------------
    #[tokio::test]
    async fn scenario_concurrent_append_and_tamper_detection() {
        let audit_dir = TempDir::new().unwrap();
        let audit = audit_handle(&audit_dir).await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let audit = audit.clone();
            handles.push(tokio::spawn(async move {
                audit
                    .append(egide_audit::AuditEvent {
                        event_type: "test.event".to_string(),
                        actor_type: "system".to_string(),
                        actor_id: format!("worker-{i}"),
                        target: None,
                        access_granted: true,
                        denial_reason: None,
                        correlation_id: String::new(),
                        event_data: "{}".to_string(),
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = audit.entries(SeqRange::default()).await.unwrap();
        assert_eq!(entries.len(), 10);
        let mut seqs: Vec<i64> = entries.iter().map(|e| e.seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());

        match audit.verify_chain(SeqRange::default()).await.unwrap() {
            ChainVerification::Valid => {}
            other => panic!("expected a valid chain, got {other:?}"),
        }

        let raw = SqliteBackend::open(audit_dir.path(), "audit").await.unwrap();
        raw.execute(
            "UPDATE audit_logs SET event_data = ? WHERE seq = 5",
            &["{\"tampered\":true}", ],
        )
        .await
        .unwrap();

        match audit.verify_chain(SeqRange::default()).await.unwrap() {
            ChainVerification::Broken { seq, .. } => assert_eq!(seq, 5),
            ChainVerification::Valid => panic!("tampering must be detected"),
        }
    }

    // ------------------------------------------------------------------
    // Scenario 6: lease renewal and retry-until-revoked.
    // ------------------------------------------------------------------
    struct FlakyEngine {
        revoke_failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl DynamicEngine for FlakyEngine {
        async fn renew(&self, _lease: &Lease, _new_ttl_seconds: i64) -> Result<(), LeaseError> {
            Ok(())
        }

        async fn revoke(&self, _lease: &Lease) -> Result<(), LeaseError> {
            let remaining = self.revoke_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.revoke_failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(LeaseError::RevokeFailed("simulated failure".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn scenario_lease_renew_and_retry_until_revoked() {
        let audit_dir = TempDir::new().unwrap();
        let leases_dir = TempDir::new().unwrap();
        let audit = audit_handle(&audit_dir).await;

        let manager = Arc::new(LeaseManager::open(leases_dir.path(), audit).await.unwrap());
        manager.register_engine(
            "postgres",
            Arc::new(FlakyEngine {
                revoke_failures_remaining: AtomicUsize::new(2),
            }),
        );

        let lease = manager
            .create_lease(LeaseAttrs {
                engine_type: "postgres".to_string(),
                role_name: "readonly".to_string(),
                ttl_seconds: 60,
                max_ttl_seconds: 3600,
                renewable: true,
                credentials: serde_json::json!({ "username": "app", "password": "x" }),
            })
            .await
            .unwrap();

        let original_expiry = lease.expires_at;
        let renewed = manager.renew_lease(&lease.id, 30).await.unwrap();
        assert!(renewed.expires_at > original_expiry);

        let first_attempt = manager.revoke_lease(&lease.id).await;
        assert!(first_attempt.is_err());
        let after_first = manager.get_lease(&lease.id).await.unwrap();
        assert_eq!(after_first.status, LeaseStatus::RevokeFailed);

        manager.clone().retry_revoke_until_orphaned(lease.id.clone()).await;

        let final_lease = manager.get_lease(&lease.id).await.unwrap();
        assert_eq!(final_lease.status, LeaseStatus::Revoked);
    }
}
