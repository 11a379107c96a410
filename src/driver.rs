//! Deployment-pass driver.
//!
//! One run reconciles each descriptor in turn, sends what the process can
//! sign for, queues the rest in the batch file, then flushes the batch
//! through an approval authority once at the end.

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    approval::{ApprovalAuthority, ApprovalDispatcher, DispatchOutcome},
    batch::BatchFile,
    contracts::RoutingContracts,
    desired::DesiredState,
    prelude::*,
    prepare::{Prepared, ProposedCall, TransactionPreparer, TransactionSender},
    reader::StateReader,
    reconcile::{CallSink, ReconcilePolicy, Reconciler},
};

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Corrective calls emitted by the reconciler.
    pub proposed: usize,
    /// Calls sent directly under a controlled identity.
    pub executed: usize,
    /// Calls newly appended to the batch.
    pub queued: usize,
    /// Calls already present in the batch.
    pub duplicates: usize,
}

/// Result of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub passes: Vec<PassReport>,
    pub outcome: DispatchOutcome,
}

/// Executes or queues each call as the reconciler emits it.
struct PreparingSink<'a, S: TransactionSender + ?Sized> {
    preparer: TransactionPreparer<'a, S>,
    batch: &'a BatchFile,
    report: PassReport,
}

#[async_trait]
impl<'a, S: TransactionSender + ?Sized> CallSink for PreparingSink<'a, S> {
    async fn submit(&mut self, call: ProposedCall) -> Result<()> {
        self.report.proposed += 1;
        match self.preparer.prepare(&call).await? {
            Prepared::Executed { .. } => self.report.executed += 1,
            Prepared::Deferred(tx) => {
                if self.batch.append(tx)? {
                    self.report.queued += 1;
                } else {
                    self.report.duplicates += 1;
                }
            }
        }
        Ok(())
    }
}

/// Runs reconciliation passes against one live system.
pub struct ExecutionDriver<'a, R: StateReader + ?Sized, S: TransactionSender + ?Sized> {
    reader: &'a R,
    sender: &'a S,
    contracts: RoutingContracts,
    policy: ReconcilePolicy,
    governor: Address,
    batch: BatchFile,
}

impl<'a, R, S> ExecutionDriver<'a, R, S>
where
    R: StateReader + ?Sized,
    S: TransactionSender + ?Sized,
{
    /// `governor` is the identity every corrective call must come from.
    pub fn new(
        reader: &'a R,
        sender: &'a S,
        contracts: RoutingContracts,
        governor: Address,
        batch: BatchFile,
    ) -> Self {
        Self {
            reader,
            sender,
            contracts,
            policy: ReconcilePolicy::default(),
            governor,
            batch,
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn batch(&self) -> &BatchFile {
        &self.batch
    }

    fn reconciler(&self) -> Reconciler<'a, R> {
        Reconciler::new(self.reader, self.contracts).with_policy(self.policy)
    }

    /// Compute the corrective calls for `desired` without sending or
    /// queueing anything.
    pub async fn plan(&self, desired: &DesiredState) -> Result<Vec<ProposedCall>> {
        let mut calls = Vec::new();
        self.reconciler()
            .reconcile(desired, self.governor, &mut calls)
            .await?;
        Ok(calls)
    }

    /// Reconcile `desired` once. Deferred calls land in the batch file as
    /// they are produced; on error they stay there.
    pub async fn run_pass(&self, desired: &DesiredState) -> Result<PassReport> {
        let mut sink = PreparingSink {
            preparer: TransactionPreparer::new(self.sender),
            batch: &self.batch,
            report: PassReport::default(),
        };

        if let Err(e) = self
            .reconciler()
            .reconcile(desired, self.governor, &mut sink)
            .await
        {
            warn!(
                error = %e,
                executed = sink.report.executed,
                queued = sink.report.queued,
                "Pass aborted, queued corrections kept"
            );
            return Err(e);
        }

        info!(
            proposed = sink.report.proposed,
            executed = sink.report.executed,
            queued = sink.report.queued,
            duplicates = sink.report.duplicates,
            "Pass complete"
        );
        Ok(sink.report)
    }

    /// Run every pass in order, then dispatch the batch once.
    pub async fn run<A: ApprovalAuthority + ?Sized>(
        &self,
        passes: &[DesiredState],
        authority: &A,
    ) -> Result<RunReport> {
        let mut reports = Vec::with_capacity(passes.len());
        for (index, desired) in passes.iter().enumerate() {
            info!(pass = index + 1, of = passes.len(), entries = desired.len(), "Starting pass");
            reports.push(self.run_pass(desired).await?);
        }

        let outcome = ApprovalDispatcher::new(&self.batch, authority)
            .dispatch()
            .await?;
        Ok(RunReport {
            passes: reports,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::SimulatedAuthority;
    use crate::chain::simulated::SimulatedChain;
    use crate::contracts::RoutingCall;
    use crate::desired::{CustomOracle, LegacyPool, StalenessOverride};
    use crate::Error;
    use alloy::primitives::address;

    const ROUTER: Address = address!("0x00000000000000000000000000000000000000a1");
    const AGGREGATOR_ORACLE: Address = address!("0x00000000000000000000000000000000000000a2");
    const LEGACY_ORACLE: Address = address!("0x00000000000000000000000000000000000000a3");
    const SAFE: Address = address!("0x00000000000000000000000000000000000000f1");
    const DEPLOYER: Address = address!("0x00000000000000000000000000000000000000d1");
    const TOKEN_X: Address = address!("0x1111111111111111111111111111111111111111");
    const ORACLE_Y: Address = address!("0x2222222222222222222222222222222222222222");
    const TOKEN_Z: Address = address!("0x3333333333333333333333333333333333333333");
    const POOL_P: Address = address!("0x4444444444444444444444444444444444444444");

    fn contracts() -> RoutingContracts {
        RoutingContracts {
            router: ROUTER,
            aggregator_oracle: AGGREGATOR_ORACLE,
            legacy_pool_oracle: LEGACY_ORACLE,
            ..Default::default()
        }
    }

    fn chain() -> SimulatedChain {
        let chain = SimulatedChain::new(contracts()).with_account(DEPLOYER);
        chain.set_default_oracle(AGGREGATOR_ORACLE);
        chain
    }

    fn two_updates() -> DesiredState {
        DesiredState {
            custom_oracles: vec![
                CustomOracle {
                    token: TOKEN_X,
                    oracle: ORACLE_Y,
                },
                CustomOracle {
                    token: TOKEN_Z,
                    oracle: ORACLE_Y,
                },
            ],
            ..Default::default()
        }
    }

    fn batch_in(dir: &tempfile::TempDir) -> BatchFile {
        BatchFile::new(dir.path().join("deployments/pending-safe-batch.json"))
    }

    #[tokio::test]
    async fn test_custodied_governor_batches_then_simulates() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir));
        let authority = SimulatedAuthority::new(&chain, SAFE);

        let pass = driver.run_pass(&two_updates()).await.unwrap();
        assert_eq!(pass.proposed, 2);
        assert_eq!(pass.queued, 2);
        assert_eq!(driver.batch().len().unwrap(), 2);
        assert!(chain.sent().is_empty());

        let outcome = ApprovalDispatcher::new(driver.batch(), &authority)
            .dispatch()
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Applied { ref executed } if executed.len() == 2));
        let calls: Vec<RoutingCall> = chain.sent().iter().map(|s| s.call).collect();
        assert_eq!(
            calls,
            vec![
                RoutingCall::UpdateTokenOracle {
                    token: TOKEN_X,
                    oracle: ORACLE_Y
                },
                RoutingCall::UpdateTokenOracle {
                    token: TOKEN_Z,
                    oracle: ORACLE_Y
                },
            ]
        );
        assert!(!driver.batch().path().exists());
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let first = DesiredState {
            custom_oracles: vec![two_updates().custom_oracles[0]],
            ..Default::default()
        };

        // run 1 stops before dispatch
        ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir))
            .run_pass(&first)
            .await
            .unwrap();
        assert_eq!(batch_in(&dir).len().unwrap(), 1);

        // run 2 sees the same mismatch plus a new one
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir));
        let authority = SimulatedAuthority::new(&chain, SAFE);
        let report = driver.run(&[two_updates()], &authority).await.unwrap();

        assert_eq!(report.passes[0].duplicates, 1);
        assert_eq!(report.passes[0].queued, 1);
        let tokens: Vec<Address> = chain
            .sent()
            .iter()
            .map(|s| match s.call {
                RoutingCall::UpdateTokenOracle { token, .. } => token,
                other => panic!("unexpected call {other}"),
            })
            .collect();
        assert_eq!(tokens, vec![TOKEN_X, TOKEN_Z]);
    }

    #[tokio::test]
    async fn test_controlled_governor_executes_directly() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), DEPLOYER, batch_in(&dir));
        let authority = SimulatedAuthority::new(&chain, SAFE);

        let report = driver.run(&[two_updates()], &authority).await.unwrap();

        assert_eq!(report.passes[0].executed, 2);
        assert_eq!(report.passes[0].queued, 0);
        assert_eq!(report.outcome, DispatchOutcome::Empty);
        assert!(!driver.batch().path().exists());
        assert_eq!(chain.token_oracle_of(TOKEN_Z), ORACLE_Y);
    }

    #[tokio::test]
    async fn test_repeated_pass_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir));

        driver.run_pass(&two_updates()).await.unwrap();
        let second = driver.run_pass(&two_updates()).await.unwrap();

        assert_eq!(second.proposed, 2);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.queued, 0);
        assert_eq!(driver.batch().len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fatal_precondition_keeps_queued_entries() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        chain.set_default_oracle(ORACLE_Y);
        let mut desired = two_updates();
        desired.staleness.push(StalenessOverride {
            token: TOKEN_X,
            max_staleness: 86_400,
        });
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir));
        let authority = SimulatedAuthority::new(&chain, SAFE);

        let err = driver.run(&[desired], &authority).await.unwrap_err();

        assert!(matches!(err, Error::ConfigInvariantViolation(_)));
        assert_eq!(driver.batch().len().unwrap(), 2);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let desired = DesiredState {
            legacy_pools: vec![LegacyPool {
                token: POOL_P,
                is_lending: true,
            }],
            ..two_updates()
        };
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), SAFE, batch_in(&dir));
        let authority = SimulatedAuthority::new(&chain, SAFE);

        let first = driver.run(std::slice::from_ref(&desired), &authority).await.unwrap();
        assert_eq!(first.passes[0].queued, 4);
        assert_eq!(chain.legacy_pool(POOL_P), Some(true));

        let second = driver.run(&[desired], &authority).await.unwrap();
        assert_eq!(second.passes[0], PassReport::default());
        assert_eq!(second.outcome, DispatchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_plan_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain();
        let driver = ExecutionDriver::new(&chain, &chain, contracts(), DEPLOYER, batch_in(&dir));

        let calls = driver.plan(&two_updates()).await.unwrap();

        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.sender == DEPLOYER));
        assert!(chain.sent().is_empty());
        assert!(!driver.batch().path().exists());
    }
}
