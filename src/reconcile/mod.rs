//! Desired-state reconciliation.
//!
//! Walks a [`DesiredState`] category by category, compares every entry with
//! the live value from a [`StateReader`] and emits a [`ProposedCall`] for each
//! difference. Calls are handed to a [`CallSink`] as soon as they are
//! computed, so a fatal error in a later category leaves earlier corrections
//! with the sink.
//!
//! # Category order
//!
//! ```text
//! custom_oracle → aggregator → legacy_pool → factory_pool
//!   → versioned_pool → staleness → eth_feed
//! ```
//!
//! Entries inside a category are processed in descriptor order. The
//! reconciler neither reorders nor deduplicates; the batch file does the
//! latter.


use std::fmt;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    contracts::{RoutingCall, RoutingContracts},
    desired::{DesiredState, PoolToken},
    prelude::*,
    prepare::ProposedCall,
    reader::StateReader,
    Error,
};

/// Reconciliation category, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    CustomOracle,
    Aggregator,
    LegacyPool,
    FactoryPool,
    VersionedPool,
    Staleness,
    EthFeed,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::CustomOracle,
        Category::Aggregator,
        Category::LegacyPool,
        Category::FactoryPool,
        Category::VersionedPool,
        Category::Staleness,
        Category::EthFeed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::CustomOracle => "custom_oracle",
            Category::Aggregator => "aggregator",
            Category::LegacyPool => "legacy_pool",
            Category::FactoryPool => "factory_pool",
            Category::VersionedPool => "versioned_pool",
            Category::Staleness => "staleness",
            Category::EthFeed => "eth_feed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// When a category runs its secondary check (pool registration, ETH feed address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryCheck {
    /// Check every entry.
    Always,
    /// Check only entries whose oracle mapping was just corrected.
    OnUpdate,
}

impl SecondaryCheck {
    fn applies(self, mapping_updated: bool) -> bool {
        match self {
            SecondaryCheck::Always => true,
            SecondaryCheck::OnUpdate => mapping_updated,
        }
    }
}

/// Secondary-check policy per category.
///
/// The default keeps legacy pools on `Always` and the other categories on
/// `OnUpdate`. Under `OnUpdate` a pool whose oracle mapping is already right
/// is never checked for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilePolicy {
    pub legacy_pools: SecondaryCheck,
    pub factory_pools: SecondaryCheck,
    pub versioned_pools: SecondaryCheck,
    pub eth_feeds: SecondaryCheck,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            legacy_pools: SecondaryCheck::Always,
            factory_pools: SecondaryCheck::OnUpdate,
            versioned_pools: SecondaryCheck::OnUpdate,
            eth_feeds: SecondaryCheck::OnUpdate,
        }
    }
}

/// Receiver of corrective calls, fed in emission order.
#[async_trait]
pub trait CallSink: Send {
    async fn submit(&mut self, call: ProposedCall) -> Result<()>;
}

#[async_trait]
impl CallSink for Vec<ProposedCall> {
    async fn submit(&mut self, call: ProposedCall) -> Result<()> {
        self.push(call);
        Ok(())
    }
}

/// Per-pass state threaded through the category handlers.
struct Pass<'s, K: CallSink + ?Sized> {
    governor: Address,
    sink: &'s mut K,
    emitted: usize,
}

impl<K: CallSink + ?Sized> Pass<'_, K> {
    async fn emit(&mut self, category: Category, target: Address, call: RoutingCall) -> Result<()> {
        let proposed = ProposedCall::new(category, target, call, self.governor);
        info!(
            category = %category,
            target = %target,
            signature = proposed.call.signature(),
            args = ?proposed.args(),
            "Correction needed"
        );
        self.sink.submit(proposed).await?;
        self.emitted += 1;
        Ok(())
    }
}

/// Computes corrective calls for one descriptor against the live state.
pub struct Reconciler<'a, R: StateReader + ?Sized> {
    reader: &'a R,
    contracts: RoutingContracts,
    policy: ReconcilePolicy,
}

impl<'a, R: StateReader + ?Sized> Reconciler<'a, R> {
    pub fn new(reader: &'a R, contracts: RoutingContracts) -> Self {
        Self {
            reader,
            contracts,
            policy: ReconcilePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one reconciliation pass.
    ///
    /// Every emitted call names `governor` as its sender. Returns the number
    /// of calls handed to `sink`. On error, calls emitted before the failure
    /// have already been submitted.
    pub async fn reconcile<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        governor: Address,
        sink: &mut K,
    ) -> Result<usize> {
        let mut pass = Pass {
            governor,
            sink,
            emitted: 0,
        };

        for category in Category::ALL {
            let before = pass.emitted;
            match category {
                Category::CustomOracle => self.custom_oracles(desired, &mut pass).await?,
                Category::Aggregator => self.aggregators(desired, &mut pass).await?,
                Category::LegacyPool => self.legacy_pools(desired, &mut pass).await?,
                Category::FactoryPool => {
                    let oracle = self.contracts.factory_pool_oracle;
                    self.pool_tokens(
                        category,
                        "factory_pool_oracle",
                        oracle,
                        &desired.factory_pools,
                        self.policy.factory_pools,
                        &mut pass,
                    )
                    .await?
                }
                Category::VersionedPool => {
                    let oracle = self.contracts.versioned_pool_oracle;
                    self.pool_tokens(
                        category,
                        "versioned_pool_oracle",
                        oracle,
                        &desired.versioned_pools,
                        self.policy.versioned_pools,
                        &mut pass,
                    )
                    .await?
                }
                Category::Staleness => self.staleness(desired, &mut pass).await?,
                Category::EthFeed => self.eth_feeds(desired, &mut pass).await?,
            }
            if pass.emitted > before {
                debug!(
                    category = %category,
                    corrections = pass.emitted - before,
                    "Category reconciled"
                );
            }
        }

        info!(
            entries = desired.len(),
            corrections = pass.emitted,
            governor = %governor,
            "Reconciliation pass complete"
        );
        Ok(pass.emitted)
    }

    async fn custom_oracles<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if desired.custom_oracles.is_empty() {
            return Ok(());
        }
        let router = self.contracts.require("router", self.contracts.router)?;

        for entry in &desired.custom_oracles {
            let live = self.reader.token_oracle(router, entry.token).await?;
            if live == entry.oracle {
                debug!(token = %entry.token, oracle = %live, "Custom oracle already set");
                continue;
            }
            pass.emit(
                Category::CustomOracle,
                router,
                RoutingCall::UpdateTokenOracle {
                    token: entry.token,
                    oracle: entry.oracle,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn aggregators<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if desired.aggregators.is_empty() {
            return Ok(());
        }
        let oracle = self
            .contracts
            .require("aggregator_oracle", self.contracts.aggregator_oracle)?;

        for entry in &desired.aggregators {
            let live = self.reader.price_feed(oracle, entry.token).await?;
            if live == entry.aggregator {
                debug!(token = %entry.token, feed = %live, "Aggregator already set");
                continue;
            }
            pass.emit(
                Category::Aggregator,
                oracle,
                RoutingCall::SetPriceFeed {
                    token: entry.token,
                    feed: entry.aggregator,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn legacy_pools<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if desired.legacy_pools.is_empty() {
            return Ok(());
        }
        let router = self.contracts.require("router", self.contracts.router)?;
        let oracle = self
            .contracts
            .require("legacy_pool_oracle", self.contracts.legacy_pool_oracle)?;

        for entry in &desired.legacy_pools {
            let updated = self
                .route_to(Category::LegacyPool, router, entry.token, oracle, pass)
                .await?;

            if !self.policy.legacy_pools.applies(updated) {
                continue;
            }
            let registration = self
                .reader
                .legacy_pool_registration(oracle, entry.token)
                .await?;
            if registration.is_registered() {
                continue;
            }
            let call = if entry.is_lending {
                RoutingCall::RegisterLendingPool { pool: entry.token }
            } else {
                RoutingCall::RegisterPool { pool: entry.token }
            };
            pass.emit(Category::LegacyPool, oracle, call).await?;
        }
        Ok(())
    }

    async fn pool_tokens<K: CallSink + ?Sized>(
        &self,
        category: Category,
        oracle_name: &str,
        oracle: Address,
        entries: &[PoolToken],
        check: SecondaryCheck,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let router = self.contracts.require("router", self.contracts.router)?;
        let oracle = self.contracts.require(oracle_name, oracle)?;

        for entry in entries {
            let updated = self
                .route_to(category, router, entry.token, oracle, pass)
                .await?;

            if !check.applies(updated) {
                continue;
            }
            let registration = self.reader.pool_registration(oracle, entry.token).await?;
            if !registration.is_registered() {
                pass.emit(category, oracle, RoutingCall::RegisterPool { pool: entry.token })
                    .await?;
            }
        }
        Ok(())
    }

    async fn staleness<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if desired.staleness.is_empty() {
            return Ok(());
        }
        let router = self.contracts.require("router", self.contracts.router)?;
        let oracle = self
            .contracts
            .require("aggregator_oracle", self.contracts.aggregator_oracle)?;

        let default_oracle = self.reader.default_oracle(router).await?;
        if default_oracle != oracle {
            warn!(
                default_oracle = %default_oracle,
                expected = %oracle,
                pending_overrides = desired.staleness.len(),
                "Refusing staleness overrides"
            );
            return Err(Error::ConfigInvariantViolation(format!(
                "router default oracle is {default_oracle}, staleness overrides require {oracle}"
            )));
        }

        for entry in &desired.staleness {
            let wanted = U256::from(entry.max_staleness);
            let live = self.reader.max_staleness(oracle, entry.token).await?;
            if live == wanted {
                debug!(token = %entry.token, period = %live, "Staleness already set");
                continue;
            }
            pass.emit(
                Category::Staleness,
                oracle,
                RoutingCall::SetMaxStaleness {
                    token: entry.token,
                    period: wanted,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn eth_feeds<K: CallSink + ?Sized>(
        &self,
        desired: &DesiredState,
        pass: &mut Pass<'_, K>,
    ) -> Result<()> {
        if desired.eth_feeds.is_empty() {
            return Ok(());
        }
        let router = self.contracts.require("router", self.contracts.router)?;
        let oracle = self
            .contracts
            .require("eth_feed_oracle", self.contracts.eth_feed_oracle)?;

        for entry in &desired.eth_feeds {
            let updated = self
                .route_to(Category::EthFeed, router, entry.token, oracle, pass)
                .await?;

            if !self.policy.eth_feeds.applies(updated) {
                continue;
            }
            let live = self.reader.price_feed(oracle, entry.token).await?;
            if live != entry.feed {
                pass.emit(
                    Category::EthFeed,
                    oracle,
                    RoutingCall::SetPriceFeed {
                        token: entry.token,
                        feed: entry.feed,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Point the router's mapping for `token` at `oracle`. Returns whether a
    /// correction was emitted.
    async fn route_to<K: CallSink + ?Sized>(
        &self,
        category: Category,
        router: Address,
        token: Address,
        oracle: Address,
        pass: &mut Pass<'_, K>,
    ) -> Result<bool> {
        let live = self.reader.token_oracle(router, token).await?;
        if live == oracle {
            debug!(category = %category, token = %token, "Token already routed");
            return Ok(false);
        }
        pass.emit(
            category,
            router,
            RoutingCall::UpdateTokenOracle { token, oracle },
        )
        .await?;
        Ok(true)
    }
}
