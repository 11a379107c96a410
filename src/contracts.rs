//! ABI and address book of the oracle routing contracts.
//!
//! The router maps each token to the oracle that prices it. Dedicated oracles
//! (aggregator feeds, ETH-denominated feeds, pool-token oracles) carry their
//! own per-token configuration. [`RoutingCall`] is the closed set of writes
//! the reconciler can emit against them.

use std::fmt;

use alloy::{
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

use crate::{prelude::*, Error};

sol! {
    interface IOracleRouter {
        function defaultOracle() external view returns (address oracle);
        function getTokenOracle(address token) external view returns (address oracle);
        function updateTokenOracle(address token, address oracle) external;
    }

    interface IFeedOracle {
        function priceFeeds(address token) external view returns (address feed);
        function setPriceFeed(address token, address feed) external;
    }

    interface IStalenessOracle {
        function maxStaleness(address token) external view returns (uint256 period);
        function setMaxStaleness(address token, uint256 period) external;
    }

    interface ILegacyPoolOracle {
        function getPoolInfo(address pool) external view returns (address registry, bool isLending);
        function registerPool(address pool) external;
        function registerLendingPool(address pool) external;
    }

    interface IPoolOracle {
        function isRegistered(address pool) external view returns (bool registered);
        function registerPool(address pool) external;
    }
}

/// Addresses of the routing contracts for one network.
///
/// A zero address means "not deployed here"; reconciling a category whose
/// contract is zero is a configuration error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingContracts {
    /// Router holding the per-token oracle mapping and the default oracle.
    pub router: Address,
    /// Aggregator-backed oracle. Also the implementation the router's default
    /// oracle must be before staleness overrides may be applied.
    pub aggregator_oracle: Address,
    pub legacy_pool_oracle: Address,
    pub factory_pool_oracle: Address,
    pub versioned_pool_oracle: Address,
    /// Oracle pricing tokens through ETH-denominated feeds.
    pub eth_feed_oracle: Address,
}

impl RoutingContracts {
    /// Return `address` or a config error naming the missing contract.
    pub fn require(&self, name: &str, address: Address) -> Result<Address> {
        if address.is_zero() {
            return Err(Error::Config(format!(
                "contracts.{name} is not set for this network"
            )));
        }
        Ok(address)
    }
}

/// One corrective write against a routing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingCall {
    UpdateTokenOracle { token: Address, oracle: Address },
    SetPriceFeed { token: Address, feed: Address },
    SetMaxStaleness { token: Address, period: U256 },
    RegisterPool { pool: Address },
    RegisterLendingPool { pool: Address },
}

impl RoutingCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::UpdateTokenOracle { .. } => "updateTokenOracle",
            Self::SetPriceFeed { .. } => "setPriceFeed",
            Self::SetMaxStaleness { .. } => "setMaxStaleness",
            Self::RegisterPool { .. } => "registerPool",
            Self::RegisterLendingPool { .. } => "registerLendingPool",
        }
    }

    /// Canonical Solidity signature, e.g. `updateTokenOracle(address,address)`.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::UpdateTokenOracle { .. } => IOracleRouter::updateTokenOracleCall::SIGNATURE,
            Self::SetPriceFeed { .. } => IFeedOracle::setPriceFeedCall::SIGNATURE,
            Self::SetMaxStaleness { .. } => IStalenessOracle::setMaxStalenessCall::SIGNATURE,
            Self::RegisterPool { .. } => IPoolOracle::registerPoolCall::SIGNATURE,
            Self::RegisterLendingPool { .. } => {
                ILegacyPoolOracle::registerLendingPoolCall::SIGNATURE
            }
        }
    }

    /// Arguments rendered for logs and the `plan` output.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::UpdateTokenOracle { token, oracle } => {
                vec![token.to_string(), oracle.to_string()]
            }
            Self::SetPriceFeed { token, feed } => vec![token.to_string(), feed.to_string()],
            Self::SetMaxStaleness { token, period } => vec![token.to_string(), period.to_string()],
            Self::RegisterPool { pool } | Self::RegisterLendingPool { pool } => {
                vec![pool.to_string()]
            }
        }
    }

    pub fn abi_encode(&self) -> Bytes {
        let data = match *self {
            Self::UpdateTokenOracle { token, oracle } => {
                IOracleRouter::updateTokenOracleCall { token, oracle }.abi_encode()
            }
            Self::SetPriceFeed { token, feed } => {
                IFeedOracle::setPriceFeedCall { token, feed }.abi_encode()
            }
            Self::SetMaxStaleness { token, period } => {
                IStalenessOracle::setMaxStalenessCall { token, period }.abi_encode()
            }
            Self::RegisterPool { pool } => IPoolOracle::registerPoolCall { pool }.abi_encode(),
            Self::RegisterLendingPool { pool } => {
                ILegacyPoolOracle::registerLendingPoolCall { pool }.abi_encode()
            }
        };
        Bytes::from(data)
    }

    /// Decode calldata produced by [`RoutingCall::abi_encode`].
    pub fn abi_decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::UnknownCall(format!("{} bytes of calldata", data.len())));
        }
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
        let abi_err = |e: alloy::sol_types::Error| Error::Abi(e.to_string());

        if selector == IOracleRouter::updateTokenOracleCall::SELECTOR {
            let call = IOracleRouter::updateTokenOracleCall::abi_decode(data).map_err(abi_err)?;
            Ok(Self::UpdateTokenOracle {
                token: call.token,
                oracle: call.oracle,
            })
        } else if selector == IFeedOracle::setPriceFeedCall::SELECTOR {
            let call = IFeedOracle::setPriceFeedCall::abi_decode(data).map_err(abi_err)?;
            Ok(Self::SetPriceFeed {
                token: call.token,
                feed: call.feed,
            })
        } else if selector == IStalenessOracle::setMaxStalenessCall::SELECTOR {
            let call = IStalenessOracle::setMaxStalenessCall::abi_decode(data).map_err(abi_err)?;
            Ok(Self::SetMaxStaleness {
                token: call.token,
                period: call.period,
            })
        } else if selector == IPoolOracle::registerPoolCall::SELECTOR {
            let call = IPoolOracle::registerPoolCall::abi_decode(data).map_err(abi_err)?;
            Ok(Self::RegisterPool { pool: call.pool })
        } else if selector == ILegacyPoolOracle::registerLendingPoolCall::SELECTOR {
            let call =
                ILegacyPoolOracle::registerLendingPoolCall::abi_decode(data).map_err(abi_err)?;
            Ok(Self::RegisterLendingPool { pool: call.pool })
        } else {
            Err(Error::UnknownCall(format!(
                "selector 0x{}",
                alloy::primitives::hex::encode(selector)
            )))
        }
    }
}

impl fmt::Display for RoutingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method_name(), self.args().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const TOKEN: Address = address!("0x1111111111111111111111111111111111111111");
    const ORACLE: Address = address!("0x2222222222222222222222222222222222222222");

    #[test]
    fn test_update_token_oracle_layout() {
        let call = RoutingCall::UpdateTokenOracle {
            token: TOKEN,
            oracle: ORACLE,
        };
        let data = call.abi_encode();

        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(&data[..4], &IOracleRouter::updateTokenOracleCall::SELECTOR);
        assert_eq!(&data[16..36], TOKEN.as_slice());
        assert_eq!(&data[48..68], ORACLE.as_slice());
        assert_eq!(call.signature(), "updateTokenOracle(address,address)");
    }

    #[test]
    fn test_decode_recovers_each_variant() {
        let calls = [
            RoutingCall::UpdateTokenOracle {
                token: TOKEN,
                oracle: ORACLE,
            },
            RoutingCall::SetPriceFeed {
                token: TOKEN,
                feed: ORACLE,
            },
            RoutingCall::SetMaxStaleness {
                token: TOKEN,
                period: U256::from(86_400u64),
            },
            RoutingCall::RegisterPool { pool: TOKEN },
            RoutingCall::RegisterLendingPool { pool: TOKEN },
        ];
        for call in calls {
            assert_eq!(RoutingCall::abi_decode(&call.abi_encode()).unwrap(), call);
        }
    }

    #[test]
    fn test_legacy_and_pool_register_share_selector() {
        assert_eq!(
            ILegacyPoolOracle::registerPoolCall::SELECTOR,
            IPoolOracle::registerPoolCall::SELECTOR
        );
    }

    #[test]
    fn test_decode_rejects_unknown_selector() {
        let err = RoutingCall::abi_decode(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, Error::UnknownCall(_)));
        assert!(RoutingCall::abi_decode(&[0x01]).is_err());
    }

    #[test]
    fn test_display_lists_args() {
        let call = RoutingCall::RegisterPool { pool: TOKEN };
        assert_eq!(call.to_string(), format!("registerPool({TOKEN})"));
    }

    #[test]
    fn test_require_rejects_zero_address() {
        let contracts = RoutingContracts {
            router: ORACLE,
            ..Default::default()
        };
        assert_eq!(contracts.require("router", contracts.router).unwrap(), ORACLE);
        let err = contracts
            .require("eth_feed_oracle", contracts.eth_feed_oracle)
            .unwrap_err();
        assert!(err.to_string().contains("eth_feed_oracle"));
    }
}
