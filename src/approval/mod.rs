//! Approval dispatch for the pending batch.
//!
//! Deferred corrections sit in the [`BatchFile`] until the multi-party
//! authority takes them. Two authorities exist:
//!
//! - [`SimulatedAuthority`] impersonates the authority identity on an
//!   ephemeral node and sends every entry itself, in file order
//! - [`ExternalAuthority`] submits the whole batch as one proposal to an
//!   [`ApprovalService`] and returns without waiting for approval
//!
//! The dispatcher clears the batch once the authority accepted it. On any
//! error the file is left as it was.

pub mod safe;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    batch::BatchFile,
    prelude::*,
    prepare::{PreparedTransaction, TransactionSender},
    Error,
};

pub use safe::SafeTransactionService;

/// What the batch file currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Empty,
    PendingLocal { count: usize },
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was queued.
    Empty,
    /// Every entry was executed under the simulated authority.
    Applied { executed: Vec<B256> },
    /// The batch was proposed and waits for the signers.
    PendingApproval { proposal_id: String },
}

impl DispatchOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, DispatchOutcome::PendingApproval { .. })
    }
}

/// Takes the whole pending batch in one step.
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    /// Short label for logs.
    fn mode(&self) -> &'static str;

    /// Apply or propose `txs`, in order. Called only with a non-empty batch.
    async fn apply(&self, txs: &[PreparedTransaction]) -> Result<DispatchOutcome>;
}

/// External multi-party approval service.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// Submit `txs` as one atomic proposal signed by `delegate`. Returns the
    /// proposal id.
    async fn propose(&self, txs: &[PreparedTransaction], delegate: Address) -> Result<String>;
}

/// Executes the batch by impersonating the authority identity.
pub struct SimulatedAuthority<'a, S: TransactionSender + ?Sized> {
    sender: &'a S,
    identity: Address,
}

impl<'a, S: TransactionSender + ?Sized> SimulatedAuthority<'a, S> {
    pub fn new(sender: &'a S, identity: Address) -> Self {
        Self { sender, identity }
    }
}

#[async_trait]
impl<'a, S: TransactionSender + ?Sized> ApprovalAuthority for SimulatedAuthority<'a, S> {
    fn mode(&self) -> &'static str {
        "simulated"
    }

    async fn apply(&self, txs: &[PreparedTransaction]) -> Result<DispatchOutcome> {
        self.sender.impersonate(self.identity).await?;

        let mut executed = Vec::with_capacity(txs.len());
        for (index, tx) in txs.iter().enumerate() {
            let tx_hash = self.sender.send_transaction(self.identity, tx).await?;
            info!(
                index = index,
                to = %tx.to(),
                tx_hash = %tx_hash,
                "Batch entry executed"
            );
            executed.push(tx_hash);
        }
        Ok(DispatchOutcome::Applied { executed })
    }
}

/// Proposes the batch to an [`ApprovalService`] on behalf of `delegate`.
pub struct ExternalAuthority<P: ApprovalService> {
    service: P,
    delegate: Address,
}

impl<P: ApprovalService> ExternalAuthority<P> {
    pub fn new(service: P, delegate: Address) -> Self {
        Self { service, delegate }
    }
}

#[async_trait]
impl<P: ApprovalService> ApprovalAuthority for ExternalAuthority<P> {
    fn mode(&self) -> &'static str {
        "external"
    }

    async fn apply(&self, txs: &[PreparedTransaction]) -> Result<DispatchOutcome> {
        let proposal_id = self
            .service
            .propose(txs, self.delegate)
            .await
            .map_err(|e| {
                if e.is_transport() {
                    Error::approval_unreachable(e.to_string())
                } else {
                    e
                }
            })?;
        Ok(DispatchOutcome::PendingApproval { proposal_id })
    }
}

/// Hands the pending batch to an authority and clears it on success.
pub struct ApprovalDispatcher<'a, A: ApprovalAuthority + ?Sized> {
    batch: &'a BatchFile,
    authority: &'a A,
}

impl<'a, A: ApprovalAuthority + ?Sized> ApprovalDispatcher<'a, A> {
    pub fn new(batch: &'a BatchFile, authority: &'a A) -> Self {
        Self { batch, authority }
    }

    pub fn state(&self) -> Result<DispatchState> {
        let count = self.batch.len()?;
        Ok(if count == 0 {
            DispatchState::Empty
        } else {
            DispatchState::PendingLocal { count }
        })
    }

    /// Dispatch everything queued.
    ///
    /// The batch is cleared once the authority returns successfully. A
    /// proposal is considered done at submission; its approval is not
    /// awaited.
    pub async fn dispatch(&self) -> Result<DispatchOutcome> {
        let txs = self.batch.drain()?;
        if txs.is_empty() {
            info!(mode = self.authority.mode(), "Batch empty, nothing to dispatch");
            return Ok(DispatchOutcome::Empty);
        }

        info!(
            mode = self.authority.mode(),
            pending = txs.len(),
            path = %self.batch.path().display(),
            "Dispatching batch"
        );
        let outcome = match self.authority.apply(&txs).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    mode = self.authority.mode(),
                    error = %e,
                    path = %self.batch.path().display(),
                    "Dispatch failed, batch kept"
                );
                return Err(e);
            }
        };

        self.batch.clear()?;
        match &outcome {
            DispatchOutcome::Applied { executed } => {
                info!(executed = executed.len(), "Batch applied")
            }
            DispatchOutcome::PendingApproval { proposal_id } => {
                info!(proposal_id = %proposal_id, "Batch proposed, awaiting approval")
            }
            DispatchOutcome::Empty => {}
        }
        Ok(outcome)
    }
}
