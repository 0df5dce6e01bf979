//! Actor wrapper around [`SealManager`].
//!
//! Every caller that needs the master key or the seal state goes through a
//! single task that owns the `SealManager`. This keeps initialize/unseal/seal
//! transitions serialized without requiring callers to hold a lock across an
//! await point, and lets the actor evict stale unseal progress on a timer
//! even when nobody is actively submitting shares.

use std::time::Duration;

use egide_crypto::shamir::ShamirShare;
use egide_kms::KmsUnseal;
use tokio::sync::{mpsc, oneshot};

use crate::{InitResult, SealError, SealManager, SealStatus, ShamirConfig, UnsealProgress};

/// How often the actor loop wakes up to check for expired unseal progress
/// when it isn't otherwise busy handling commands.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// A request sent to the seal actor.
pub enum SealCommand {
    /// See [`SealManager::initialize`].
    Initialize {
        config: ShamirConfig,
        reply: oneshot::Sender<Result<InitResult, SealError>>,
    },
    /// See [`SealManager::initialize_with_kms`].
    InitializeWithKms {
        config: ShamirConfig,
        kms: Box<dyn KmsUnseal>,
        reply: oneshot::Sender<Result<InitResult, SealError>>,
    },
    /// See [`SealManager::unseal`].
    Unseal {
        share: ShamirShare,
        reply: oneshot::Sender<Result<UnsealProgress, SealError>>,
    },
    /// See [`SealManager::kms_unseal`].
    KmsUnseal {
        kms: Box<dyn KmsUnseal>,
        reply: oneshot::Sender<Result<(), SealError>>,
    },
    /// See [`SealManager::seal`].
    Seal {
        reply: oneshot::Sender<()>,
    },
    /// See [`SealManager::status`].
    Status { reply: oneshot::Sender<SealStatus> },
    /// Runs a synchronous closure against the master key without ever
    /// handing the key itself outside the actor task.
    ///
    /// Used by callers that need to encrypt or decrypt with the master key
    /// (envelope DEK wrap/unwrap) but must not hold a borrow of it.
    WithMasterKey {
        op: Box<dyn FnOnce(&egide_crypto::MasterKey) -> Vec<u8> + Send>,
        reply: oneshot::Sender<Result<Vec<u8>, SealError>>,
    },
}

/// A handle to a running seal actor. Cheap to clone; every clone shares the
/// same underlying [`SealManager`].
#[derive(Clone)]
pub struct SealHandle {
    tx: mpsc::Sender<SealCommand>,
}

impl SealHandle {
    /// Spawns the actor task that owns `manager` and returns a handle to it.
    pub fn spawn(manager: SealManager) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(manager, rx));
        Self { tx }
    }

    /// See [`SealManager::initialize`].
    pub async fn initialize(&self, config: ShamirConfig) -> Result<InitResult, SealError> {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::Initialize { config, reply }).await;
        rx.await.map_err(|_| SealError::Storage("seal actor gone".into()))?
    }

    /// See [`SealManager::initialize_with_kms`].
    pub async fn initialize_with_kms(
        &self,
        config: ShamirConfig,
        kms: Box<dyn KmsUnseal>,
    ) -> Result<InitResult, SealError> {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::InitializeWithKms { config, kms, reply })
            .await;
        rx.await.map_err(|_| SealError::Storage("seal actor gone".into()))?
    }

    /// See [`SealManager::unseal`].
    pub async fn unseal(&self, share: ShamirShare) -> Result<UnsealProgress, SealError> {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::Unseal { share, reply }).await;
        rx.await.map_err(|_| SealError::Storage("seal actor gone".into()))?
    }

    /// See [`SealManager::kms_unseal`].
    pub async fn kms_unseal(&self, kms: Box<dyn KmsUnseal>) -> Result<(), SealError> {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::KmsUnseal { kms, reply }).await;
        rx.await.map_err(|_| SealError::Storage("seal actor gone".into()))?
    }

    /// See [`SealManager::seal`].
    pub async fn seal(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::Seal { reply }).await;
        let _ = rx.await;
    }

    /// See [`SealManager::status`].
    pub async fn status(&self) -> SealStatus {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::Status { reply }).await;
        rx.await.unwrap_or(SealStatus::Uninitialized)
    }

    /// Runs `op` against the live master key, failing with
    /// [`SealError::Sealed`] if the vault is not currently unsealed.
    pub async fn with_master_key<F>(&self, op: F) -> Result<Vec<u8>, SealError>
    where
        F: FnOnce(&egide_crypto::MasterKey) -> Vec<u8> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(SealCommand::WithMasterKey {
            op: Box::new(op),
            reply,
        })
        .await;
        rx.await.map_err(|_| SealError::Storage("seal actor gone".into()))?
    }

    async fn send(&self, cmd: SealCommand) {
        if self.tx.send(cmd).await.is_err() {
            tracing::error!("seal actor task has terminated");
        }
    }
}

async fn run(mut manager: SealManager, mut rx: mpsc::Receiver<SealCommand>) {
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.tick().await; // first tick fires immediately, skip it

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("seal actor channel closed, shutting down");
                    return;
                };
                handle(&mut manager, cmd).await;
            }
            _ = tick.tick() => {
                manager.expire_idle_progress();
            }
        }
    }
}

async fn handle(manager: &mut SealManager, cmd: SealCommand) {
    match cmd {
        SealCommand::Initialize { config, reply } => {
            let _ = reply.send(manager.initialize(config).await);
        }
        SealCommand::InitializeWithKms { config, kms, reply } => {
            let _ = reply.send(manager.initialize_with_kms(config, kms.as_ref()).await);
        }
        SealCommand::Unseal { share, reply } => {
            let _ = reply.send(manager.unseal(&share).await);
        }
        SealCommand::KmsUnseal { kms, reply } => {
            let _ = reply.send(manager.kms_unseal(kms.as_ref()).await);
        }
        SealCommand::Seal { reply } => {
            manager.seal();
            let _ = reply.send(());
        }
        SealCommand::Status { reply } => {
            let _ = reply.send(manager.status());
        }
        SealCommand::WithMasterKey { op, reply } => {
            let result = match manager.master_key() {
                Some(key) => Ok(op(key)),
                None => Err(SealError::Sealed),
            };
            let _ = reply.send(result);
        }
    }
}
