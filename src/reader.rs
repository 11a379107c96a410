//! Read-only view of the live routing contracts.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::prelude::Result;

/// Whether a pool is registered with its dedicated oracle.
///
/// Only a confirmed answer is a `Registration`; a failed query is an `Err`
/// from the reader and never reads as [`Registration::Absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Absent,
}

impl Registration {
    pub fn is_registered(self) -> bool {
        self == Registration::Registered
    }
}

impl From<bool> for Registration {
    fn from(registered: bool) -> Self {
        if registered {
            Registration::Registered
        } else {
            Registration::Absent
        }
    }
}

/// Read accessor for the live routing state.
///
/// Each method answers one category's "current value" question. Contract
/// addresses are passed in so implementations stay free of address books.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Oracle the router falls back to for tokens without an explicit mapping.
    async fn default_oracle(&self, router: Address) -> Result<Address>;

    /// Oracle the router currently assigns to `token`.
    async fn token_oracle(&self, router: Address, token: Address) -> Result<Address>;

    /// Feed configured for `token` inside a feed oracle.
    async fn price_feed(&self, oracle: Address, token: Address) -> Result<Address>;

    /// Staleness period configured for `token`.
    async fn max_staleness(&self, oracle: Address, token: Address) -> Result<U256>;

    /// Registration of `pool` with the legacy pool oracle.
    async fn legacy_pool_registration(&self, oracle: Address, pool: Address)
        -> Result<Registration>;

    /// Registration of `pool` with a factory or versioned pool oracle.
    async fn pool_registration(&self, oracle: Address, pool: Address) -> Result<Registration>;
}
