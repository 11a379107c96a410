//! Desired-state descriptor.
//!
//! A descriptor lists, per category, the assignments the routing contracts
//! should end up with. Entries keep the order they were written in; the
//! reconciler walks them in that order.
//!
//! ```toml
//! [[custom_oracles]]
//! token = "0x..."
//! oracle = "0x..."
//!
//! [[legacy_pools]]
//! token = "0x..."
//! is_lending = true
//!
//! [[staleness]]
//! token = "0x..."
//! max_staleness = 86400
//! ```

use std::path::Path;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{prelude::*, Error};

/// Route `token` through a custom oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CustomOracle {
    pub token: Address,
    pub oracle: Address,
}

/// Price `token` from `aggregator` inside the aggregator oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AggregatorFeed {
    pub token: Address,
    pub aggregator: Address,
}

/// Legacy liquidity-pool token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LegacyPool {
    pub token: Address,
    /// Lending pools are registered through `registerLendingPool`.
    #[serde(default)]
    pub is_lending: bool,
}

/// Factory or versioned pool token. The oracle is implied by the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolToken {
    pub token: Address,
}

/// Per-token maximum price age, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StalenessOverride {
    pub token: Address,
    pub max_staleness: u64,
}

/// Price `token` through an ETH-denominated `feed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EthFeed {
    pub token: Address,
    pub feed: Address,
}

/// Target oracle assignments for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DesiredState {
    pub custom_oracles: Vec<CustomOracle>,
    pub aggregators: Vec<AggregatorFeed>,
    pub legacy_pools: Vec<LegacyPool>,
    pub factory_pools: Vec<PoolToken>,
    pub versioned_pools: Vec<PoolToken>,
    pub staleness: Vec<StalenessOverride>,
    pub eth_feeds: Vec<EthFeed>,
}

impl DesiredState {
    /// Load a descriptor from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
            _ => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// Total number of entries across all categories.
    pub fn len(&self) -> usize {
        self.custom_oracles.len()
            + self.aggregators.len()
            + self.legacy_pools.len()
            + self.factory_pools.len()
            + self.versioned_pools.len()
            + self.staleness.len()
            + self.eth_feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const DESCRIPTOR: &str = r#"
[[custom_oracles]]
token = "0x1111111111111111111111111111111111111111"
oracle = "0x2222222222222222222222222222222222222222"

[[custom_oracles]]
token = "0x3333333333333333333333333333333333333333"
oracle = "0x2222222222222222222222222222222222222222"

[[legacy_pools]]
token = "0x4444444444444444444444444444444444444444"
is_lending = true

[[legacy_pools]]
token = "0x5555555555555555555555555555555555555555"

[[staleness]]
token = "0x1111111111111111111111111111111111111111"
max_staleness = 86400
"#;

    #[test]
    fn test_toml_descriptor_keeps_order() {
        let desired: DesiredState = toml::from_str(DESCRIPTOR).unwrap();

        assert_eq!(desired.len(), 5);
        assert_eq!(
            desired.custom_oracles[0].token,
            address!("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(
            desired.custom_oracles[1].token,
            address!("0x3333333333333333333333333333333333333333")
        );
        assert!(desired.legacy_pools[0].is_lending);
        assert!(!desired.legacy_pools[1].is_lending);
        assert_eq!(desired.staleness[0].max_staleness, 86_400);
        assert!(desired.eth_feeds.is_empty());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("desired.toml");
        std::fs::write(&toml_path, DESCRIPTOR).unwrap();
        let from_toml = DesiredState::load(&toml_path).unwrap();

        let json_path = dir.path().join("desired.json");
        std::fs::write(&json_path, serde_json::to_string(&from_toml).unwrap()).unwrap();
        let from_json = DesiredState::load(&json_path).unwrap();

        assert_eq!(from_toml, from_json);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = DesiredState::load(Path::new("/nonexistent/desired.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_descriptor() {
        let desired: DesiredState = toml::from_str("").unwrap();
        assert!(desired.is_empty());
    }
}
