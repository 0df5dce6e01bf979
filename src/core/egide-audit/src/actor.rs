//! Actor wrapper around [`AuditLog`].
//!
//! Every append goes through a single task that owns the [`AuditLog`], so
//! concurrent callers never observe a torn read of `seq_max` between two
//! `INSERT`s — the retry path in [`AuditLog::append`] exists for the rare
//! case a writer outside this process (or a future multi-writer deployment)
//! wins the race, not for callers going through the actor itself.

use tokio::sync::{mpsc, oneshot};

use crate::{AuditEntry, AuditError, AuditEvent, AuditLog, ChainVerification, SeqRange};

/// A request sent to the audit actor.
pub enum AuditCommand {
    /// See [`AuditLog::append`].
    Append {
        event: AuditEvent,
        reply: oneshot::Sender<Result<AuditEntry, AuditError>>,
    },
    /// See [`AuditLog::entries`].
    Entries {
        range: SeqRange,
        reply: oneshot::Sender<Result<Vec<AuditEntry>, AuditError>>,
    },
    /// See [`AuditLog::verify_chain`].
    VerifyChain {
        range: SeqRange,
        reply: oneshot::Sender<Result<ChainVerification, AuditError>>,
    },
    /// See [`AuditLog::export_csv`].
    ExportCsv {
        range: SeqRange,
        reply: oneshot::Sender<Result<String, AuditError>>,
    },
}

/// A handle to a running audit actor. Cheap to clone; every clone shares the
/// same underlying [`AuditLog`].
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditCommand>,
}

impl AuditHandle {
    /// Spawns the actor task that owns `log` and returns a handle to it.
    pub fn spawn(log: AuditLog) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(log, rx));
        Self { tx }
    }

    /// See [`AuditLog::append`].
    pub async fn append(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let (reply, rx) = oneshot::channel();
        self.send(AuditCommand::Append { event, reply }).await;
        rx.await.map_err(|_| AuditError::Unavailable)?
    }

    /// See [`AuditLog::entries`].
    pub async fn entries(&self, range: SeqRange) -> Result<Vec<AuditEntry>, AuditError> {
        let (reply, rx) = oneshot::channel();
        self.send(AuditCommand::Entries { range, reply }).await;
        rx.await.map_err(|_| AuditError::Unavailable)?
    }

    /// See [`AuditLog::verify_chain`].
    pub async fn verify_chain(&self, range: SeqRange) -> Result<ChainVerification, AuditError> {
        let (reply, rx) = oneshot::channel();
        self.send(AuditCommand::VerifyChain { range, reply }).await;
        rx.await.map_err(|_| AuditError::Unavailable)?
    }

    /// See [`AuditLog::export_csv`].
    pub async fn export_csv(&self, range: SeqRange) -> Result<String, AuditError> {
        let (reply, rx) = oneshot::channel();
        self.send(AuditCommand::ExportCsv { range, reply }).await;
        rx.await.map_err(|_| AuditError::Unavailable)?
    }

    async fn send(&self, cmd: AuditCommand) {
        if self.tx.send(cmd).await.is_err() {
            tracing::error!("audit actor task has terminated");
        }
    }
}

async fn run(log: AuditLog, mut rx: mpsc::Receiver<AuditCommand>) {
    while let Some(cmd) = rx.recv().await {
        handle(&log, cmd).await;
    }
    tracing::debug!("audit actor channel closed, shutting down");
}

async fn handle(log: &AuditLog, cmd: AuditCommand) {
    match cmd {
        AuditCommand::Append { event, reply } => {
            let _ = reply.send(log.append(event).await);
        }
        AuditCommand::Entries { range, reply } => {
            let _ = reply.send(log.entries(range).await);
        }
        AuditCommand::VerifyChain { range, reply } => {
            let _ = reply.send(log.verify_chain(range).await);
        }
        AuditCommand::ExportCsv { range, reply } => {
            let _ = reply.send(log.export_csv(range).await);
        }
    }
}
