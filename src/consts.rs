use alloy::primitives::{address, Address};

/// Relative path of the pending Safe batch.
pub const DEFAULT_BATCH_PATH: &str = "deployments/pending-safe-batch.json";

/// `MultiSendCallOnly` v1.3.0, same address on every chain with the canonical deployment.
pub const MULTI_SEND_CALL_ONLY: Address = address!("0x40A2aCCbd92BCA938b02010E17A5b8929b49130D");

pub const MAINNET_SAFE_SERVICE_URL: &str = "https://safe-transaction-mainnet.safe.global";
pub const SEPOLIA_SAFE_SERVICE_URL: &str = "https://safe-transaction-sepolia.safe.global";

pub const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

/// Balance given to an impersonated authority so it can pay for gas (100 ETH).
pub const IMPERSONATION_BALANCE_WEI: u128 = 100_000_000_000_000_000_000;

/// Label written into the `origin` field of Safe proposals.
pub const PROPOSAL_ORIGIN: &str = "oracle_sync";
