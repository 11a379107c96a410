//! In-memory routing contracts.
//!
//! `SimulatedChain` answers [`StateReader`] queries from a local copy of the
//! routing state and applies sent transactions by decoding their calldata.
//! It plays the live system in tests and dry runs: same calls, same order,
//! no node.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    contracts::{RoutingCall, RoutingContracts},
    prelude::*,
    prepare::{PreparedTransaction, TransactionSender},
    reader::{Registration, StateReader},
    Error,
};

/// A transaction applied by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub from: Address,
    pub tx: PreparedTransaction,
    pub call: RoutingCall,
    pub tx_hash: B256,
}

#[derive(Debug, Default)]
struct RoutingState {
    default_oracle: Address,
    token_oracles: HashMap<Address, Address>,
    /// (oracle, token) -> feed
    price_feeds: HashMap<(Address, Address), Address>,
    /// (oracle, token) -> seconds
    max_staleness: HashMap<(Address, Address), U256>,
    /// pool -> registered as lending pool
    legacy_pools: HashMap<Address, bool>,
    /// (oracle, pool)
    pools: HashSet<(Address, Address)>,
}

#[derive(Debug, Default)]
struct Signers {
    accounts: HashSet<Address>,
    impersonated: HashSet<Address>,
}

/// In-memory stand-in for the live routing contracts.
#[derive(Debug)]
pub struct SimulatedChain {
    contracts: RoutingContracts,
    state: Mutex<RoutingState>,
    signers: Mutex<Signers>,
    sent: Mutex<Vec<SentTransaction>>,
    /// Fail registration queries as if the node were unreachable.
    fail_registration_reads: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedChain {
    pub fn new(contracts: RoutingContracts) -> Self {
        Self {
            contracts,
            state: Mutex::new(RoutingState::default()),
            signers: Mutex::new(Signers::default()),
            sent: Mutex::new(Vec::new()),
            fail_registration_reads: false,
        }
    }

    /// Add an identity this process can sign for.
    pub fn with_account(self, account: Address) -> Self {
        lock(&self.signers).accounts.insert(account);
        self
    }

    pub fn with_failing_registration_reads(mut self) -> Self {
        self.fail_registration_reads = true;
        self
    }

    pub fn set_default_oracle(&self, oracle: Address) {
        lock(&self.state).default_oracle = oracle;
    }

    pub fn set_token_oracle(&self, token: Address, oracle: Address) {
        lock(&self.state).token_oracles.insert(token, oracle);
    }

    pub fn set_price_feed(&self, oracle: Address, token: Address, feed: Address) {
        lock(&self.state).price_feeds.insert((oracle, token), feed);
    }

    pub fn set_max_staleness(&self, oracle: Address, token: Address, period: U256) {
        lock(&self.state).max_staleness.insert((oracle, token), period);
    }

    pub fn register_legacy_pool(&self, pool: Address, is_lending: bool) {
        lock(&self.state).legacy_pools.insert(pool, is_lending);
    }

    pub fn register_pool(&self, oracle: Address, pool: Address) {
        lock(&self.state).pools.insert((oracle, pool));
    }

    pub fn token_oracle_of(&self, token: Address) -> Address {
        lock(&self.state)
            .token_oracles
            .get(&token)
            .copied()
            .unwrap_or_default()
    }

    /// Lending flag of a registered legacy pool, `None` when unregistered.
    pub fn legacy_pool(&self, pool: Address) -> Option<bool> {
        lock(&self.state).legacy_pools.get(&pool).copied()
    }

    pub fn is_pool_registered(&self, oracle: Address, pool: Address) -> bool {
        lock(&self.state).pools.contains(&(oracle, pool))
    }

    /// Transactions applied so far, in send order.
    pub fn sent(&self) -> Vec<SentTransaction> {
        lock(&self.sent).clone()
    }

    pub fn is_impersonating(&self, identity: Address) -> bool {
        lock(&self.signers).impersonated.contains(&identity)
    }

    fn apply(&self, target: Address, call: &RoutingCall) -> Result<()> {
        let mut state = lock(&self.state);
        match *call {
            RoutingCall::UpdateTokenOracle { token, oracle } => {
                if target != self.contracts.router {
                    return Err(Error::Reverted(format!(
                        "{target} is not the router"
                    )));
                }
                state.token_oracles.insert(token, oracle);
            }
            RoutingCall::SetPriceFeed { token, feed } => {
                state.price_feeds.insert((target, token), feed);
            }
            RoutingCall::SetMaxStaleness { token, period } => {
                state.max_staleness.insert((target, token), period);
            }
            RoutingCall::RegisterPool { pool } if target == self.contracts.legacy_pool_oracle => {
                state.legacy_pools.insert(pool, false);
            }
            RoutingCall::RegisterPool { pool } => {
                state.pools.insert((target, pool));
            }
            RoutingCall::RegisterLendingPool { pool } => {
                if target != self.contracts.legacy_pool_oracle {
                    return Err(Error::Reverted(format!(
                        "{target} has no lending pool registry"
                    )));
                }
                state.legacy_pools.insert(pool, true);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateReader for SimulatedChain {
    async fn default_oracle(&self, _router: Address) -> Result<Address> {
        Ok(lock(&self.state).default_oracle)
    }

    async fn token_oracle(&self, _router: Address, token: Address) -> Result<Address> {
        Ok(self.token_oracle_of(token))
    }

    async fn price_feed(&self, oracle: Address, token: Address) -> Result<Address> {
        Ok(lock(&self.state)
            .price_feeds
            .get(&(oracle, token))
            .copied()
            .unwrap_or_default())
    }

    async fn max_staleness(&self, oracle: Address, token: Address) -> Result<U256> {
        Ok(lock(&self.state)
            .max_staleness
            .get(&(oracle, token))
            .copied()
            .unwrap_or_default())
    }

    async fn legacy_pool_registration(
        &self,
        _oracle: Address,
        pool: Address,
    ) -> Result<Registration> {
        if self.fail_registration_reads {
            return Err(Error::GenericRequest("connection refused".to_string()));
        }
        Ok(self.legacy_pool(pool).is_some().into())
    }

    async fn pool_registration(&self, oracle: Address, pool: Address) -> Result<Registration> {
        if self.fail_registration_reads {
            return Err(Error::GenericRequest("connection refused".to_string()));
        }
        Ok(self.is_pool_registered(oracle, pool).into())
    }
}

#[async_trait]
impl TransactionSender for SimulatedChain {
    async fn controls(&self, identity: Address) -> Result<bool> {
        let signers = lock(&self.signers);
        Ok(signers.accounts.contains(&identity) || signers.impersonated.contains(&identity))
    }

    async fn send_transaction(&self, from: Address, tx: &PreparedTransaction) -> Result<B256> {
        if !self.controls(from).await? {
            return Err(Error::Wallet(format!("no signer for {from}")));
        }
        let call = RoutingCall::abi_decode(tx.data())?;
        self.apply(tx.to(), &call)?;

        let mut sent = lock(&self.sent);
        let mut preimage = (sent.len() as u64).to_be_bytes().to_vec();
        preimage.extend_from_slice(tx.to().as_slice());
        preimage.extend_from_slice(tx.data());
        let tx_hash = keccak256(preimage);

        debug!(from = %from, to = %tx.to(), call = %call, tx_hash = %tx_hash, "Simulated transaction applied");
        sent.push(SentTransaction {
            from,
            tx: tx.clone(),
            call,
            tx_hash,
        });
        Ok(tx_hash)
    }

    async fn impersonate(&self, identity: Address) -> Result<()> {
        lock(&self.signers).impersonated.insert(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes};

    const ROUTER: Address = address!("0x00000000000000000000000000000000000000a1");
    const LEGACY: Address = address!("0x00000000000000000000000000000000000000a3");
    const POOL: Address = address!("0x4444444444444444444444444444444444444444");
    const SAFE: Address = address!("0x00000000000000000000000000000000000000f1");

    fn chain() -> SimulatedChain {
        SimulatedChain::new(RoutingContracts {
            router: ROUTER,
            legacy_pool_oracle: LEGACY,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_send_requires_signer() {
        let chain = chain();
        let tx = PreparedTransaction::new(
            LEGACY,
            RoutingCall::RegisterPool { pool: POOL }.abi_encode(),
            U256::ZERO,
        );

        assert!(matches!(
            chain.send_transaction(SAFE, &tx).await,
            Err(Error::Wallet(_))
        ));

        chain.impersonate(SAFE).await.unwrap();
        chain.send_transaction(SAFE, &tx).await.unwrap();
        assert_eq!(chain.legacy_pool(POOL), Some(false));
    }

    #[tokio::test]
    async fn test_lending_registration_on_legacy_oracle() {
        let chain = chain();
        chain.impersonate(SAFE).await.unwrap();
        let tx = PreparedTransaction::new(
            LEGACY,
            RoutingCall::RegisterLendingPool { pool: POOL }.abi_encode(),
            U256::ZERO,
        );

        chain.send_transaction(SAFE, &tx).await.unwrap();

        assert_eq!(chain.legacy_pool(POOL), Some(true));
        assert_eq!(
            chain.legacy_pool_registration(LEGACY, POOL).await.unwrap(),
            Registration::Registered
        );
    }

    #[tokio::test]
    async fn test_garbage_calldata_rejected() {
        let chain = chain().with_account(SAFE);
        let tx = PreparedTransaction::new(ROUTER, Bytes::from(vec![1, 2, 3, 4, 5]), U256::ZERO);
        assert!(chain.send_transaction(SAFE, &tx).await.is_err());
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failing_registration_reads_surface_errors() {
        let chain = chain().with_failing_registration_reads();
        assert!(chain.legacy_pool_registration(LEGACY, POOL).await.is_err());
        assert!(chain.pool_registration(LEGACY, POOL).await.is_err());
    }
}
