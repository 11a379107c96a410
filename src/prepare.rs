//! Turning corrective calls into sent or deferred transactions.
//!
//! A [`ProposedCall`] names the identity that must send it. When the process
//! can sign for that identity the call is executed right away; otherwise the
//! would-be transaction is captured as a [`PreparedTransaction`] for the
//! multi-party authority to approve later.

use std::fmt;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{contracts::RoutingCall, prelude::*, reconcile::Category, serde_utils::decimal_u256};

/// One corrective write, not yet sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedCall {
    /// Category that produced the call.
    pub category: Category,
    /// Contract the call targets.
    pub target: Address,
    pub call: RoutingCall,
    /// Identity the call must be sent from.
    pub sender: Address,
}

impl ProposedCall {
    pub fn new(category: Category, target: Address, call: RoutingCall, sender: Address) -> Self {
        Self {
            category,
            target,
            call,
            sender,
        }
    }

    pub fn method_name(&self) -> &'static str {
        self.call.method_name()
    }

    pub fn args(&self) -> Vec<String> {
        self.call.args()
    }

    /// The transaction this call becomes once sent.
    pub fn to_transaction(&self) -> PreparedTransaction {
        PreparedTransaction::new(self.target, self.call.abi_encode(), U256::ZERO)
    }
}

impl fmt::Display for ProposedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}.{} from {}",
            self.category, self.target, self.call, self.sender
        )
    }
}

/// A normalized, sendable transaction.
///
/// `to` and `data` are mandatory in the serialized form; `value` defaults to
/// zero and is written as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreparedTransaction {
    to: Address,
    data: Bytes,
    #[serde(default, with = "decimal_u256")]
    value: U256,
}

impl PreparedTransaction {
    pub fn new(to: Address, data: Bytes, value: U256) -> Self {
        Self { to, data, value }
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn value(&self) -> U256 {
        self.value
    }
}

/// Result of preparing one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Sent and mined under a directly controlled identity.
    Executed { tx_hash: B256 },
    /// Sender is custodied elsewhere; the transaction awaits approval.
    Deferred(PreparedTransaction),
}

/// Write side of the live system.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Whether this process can send transactions as `identity`.
    async fn controls(&self, identity: Address) -> Result<bool>;

    /// Send `tx` from `from` and wait until it is mined.
    async fn send_transaction(&self, from: Address, tx: &PreparedTransaction) -> Result<B256>;

    /// Gain signing capability for `identity`. Only meaningful on ephemeral
    /// test networks.
    async fn impersonate(&self, identity: Address) -> Result<()>;
}

/// Routes each call to direct execution or deferral.
pub struct TransactionPreparer<'a, S: TransactionSender + ?Sized> {
    sender: &'a S,
}

impl<'a, S: TransactionSender + ?Sized> TransactionPreparer<'a, S> {
    pub fn new(sender: &'a S) -> Self {
        Self { sender }
    }

    /// Execute `call` if its sender is controllable, else return it unsent.
    pub async fn prepare(&self, call: &ProposedCall) -> Result<Prepared> {
        let tx = call.to_transaction();

        if self.sender.controls(call.sender).await? {
            let tx_hash = self.sender.send_transaction(call.sender, &tx).await?;
            info!(
                category = %call.category,
                target = %call.target,
                method = call.method_name(),
                from = %call.sender,
                tx_hash = %tx_hash,
                "Executed correction directly"
            );
            return Ok(Prepared::Executed { tx_hash });
        }

        debug!(
            category = %call.category,
            target = %call.target,
            method = call.method_name(),
            from = %call.sender,
            "Sender not controlled, deferring to approval authority"
        );
        Ok(Prepared::Deferred(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::simulated::SimulatedChain;
    use crate::contracts::RoutingContracts;
    use alloy::primitives::address;

    const ROUTER: Address = address!("0x00000000000000000000000000000000000000a1");
    const TOKEN: Address = address!("0x1111111111111111111111111111111111111111");
    const ORACLE: Address = address!("0x2222222222222222222222222222222222222222");
    const DEPLOYER: Address = address!("0x00000000000000000000000000000000000000d1");
    const SAFE: Address = address!("0x00000000000000000000000000000000000000f1");

    fn update_call(sender: Address) -> ProposedCall {
        ProposedCall::new(
            Category::CustomOracle,
            ROUTER,
            RoutingCall::UpdateTokenOracle {
                token: TOKEN,
                oracle: ORACLE,
            },
            sender,
        )
    }

    fn chain() -> SimulatedChain {
        SimulatedChain::new(RoutingContracts {
            router: ROUTER,
            ..Default::default()
        })
        .with_account(DEPLOYER)
    }

    #[test]
    fn test_transaction_json_shape() {
        let tx = update_call(SAFE).to_transaction();
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["value"], "0");
        assert!(json["data"].as_str().unwrap().starts_with("0x"));
        let back: PreparedTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_missing_value_defaults_to_zero() {
        let tx: PreparedTransaction = serde_json::from_str(
            r#"{"to":"0x1111111111111111111111111111111111111111","data":"0x1234"}"#,
        )
        .unwrap();
        assert_eq!(tx.value(), U256::ZERO);
        assert_eq!(tx.data().as_ref(), &[0x12, 0x34]);
    }

    #[test]
    fn test_missing_to_or_data_is_rejected() {
        assert!(serde_json::from_str::<PreparedTransaction>(r#"{"data":"0x12","value":"0"}"#)
            .is_err());
        assert!(serde_json::from_str::<PreparedTransaction>(
            r#"{"to":"0x1111111111111111111111111111111111111111","value":"0"}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_controlled_sender_executes() {
        let chain = chain();
        let preparer = TransactionPreparer::new(&chain);

        let prepared = preparer.prepare(&update_call(DEPLOYER)).await.unwrap();

        assert!(matches!(prepared, Prepared::Executed { .. }));
        assert_eq!(chain.token_oracle_of(TOKEN), ORACLE);
    }

    #[tokio::test]
    async fn test_custodied_sender_defers() {
        let chain = chain();
        let preparer = TransactionPreparer::new(&chain);
        let call = update_call(SAFE);

        let prepared = preparer.prepare(&call).await.unwrap();

        assert_eq!(prepared, Prepared::Deferred(call.to_transaction()));
        assert!(chain.sent().is_empty());
        assert_eq!(chain.token_oracle_of(TOKEN), Address::ZERO);
    }
}
