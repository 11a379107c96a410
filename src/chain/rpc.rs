//! JSON-RPC backend for the live routing contracts.
//!
//! Reads go through `eth_call`. Writes use `eth_sendTransaction`, so only
//! identities the node itself holds (`eth_accounts`) or impersonates are
//! controllable; everything else is deferred by the preparer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    sol_types::SolCall,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    consts::IMPERSONATION_BALANCE_WEI,
    contracts::{IFeedOracle, ILegacyPoolOracle, IOracleRouter, IPoolOracle, IStalenessOracle},
    prelude::*,
    prepare::{PreparedTransaction, TransactionSender},
    reader::{Registration, StateReader},
    req::HttpClient,
    serde_utils::hex_quantity,
    Error,
};

/// Delay between receipt polls
const RECEIPT_POLL_MS: u64 = 250;

/// Receipt polls before giving up
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// EIP-1474 "execution reverted"
const REVERT_ERROR_CODE: i64 = 3;

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug, Clone)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl From<RpcErrorObject> for Error {
    fn from(err: RpcErrorObject) -> Self {
        if err.code == REVERT_ERROR_CODE || err.message.to_lowercase().contains("revert") {
            Error::Reverted(err.message)
        } else {
            Error::Rpc {
                code: err.code,
                message: err.message,
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct ReceiptStatus {
    #[serde(default)]
    status: Option<String>,
}

/// Live routing contracts behind a JSON-RPC endpoint.
#[derive(Debug)]
pub struct RpcChain {
    http_client: HttpClient,
    next_id: AtomicU64,
    /// Node-held accounts plus impersonated identities.
    accounts: Mutex<HashSet<Address>>,
}

impl RpcChain {
    /// Connect to `rpc_url` and load the node's unlocked accounts.
    pub async fn connect(client: Option<Client>, rpc_url: &str) -> Result<Self> {
        let chain = Self {
            http_client: HttpClient::new(client, rpc_url),
            next_id: AtomicU64::new(1),
            accounts: Mutex::new(HashSet::new()),
        };

        let accounts: Vec<Address> = chain.request("eth_accounts", json!([])).await?;
        info!(rpc_url = %rpc_url, accounts = accounts.len(), "Connected to node");
        chain.accounts_mut().extend(accounts);
        Ok(chain)
    }

    fn accounts_mut(&self) -> std::sync::MutexGuard<'_, HashSet<Address>> {
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let raw: U256 = self.request("eth_chainId", json!([])).await?;
        u64::try_from(raw).map_err(|e| Error::Rpc {
            code: 0,
            message: format!("chain id out of range: {e}"),
        })
    }

    async fn request_opt<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let body = serde_json::to_string(&body).map_err(|e| Error::JsonParse(e.to_string()))?;
        let text = self.http_client.post("", body).await?;

        let response: RpcResponse<T> =
            serde_json::from_str(&text).map_err(|e| Error::JsonParse(e.to_string()))?;
        if let Some(err) = response.error {
            return Err(err.into());
        }
        Ok(response.result)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.request_opt(method, params).await?.ok_or_else(|| Error::Rpc {
            code: 0,
            message: format!("{method} returned no result"),
        })
    }

    async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return> {
        let data = Bytes::from(call.abi_encode());
        let raw: Bytes = self
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        C::abi_decode_returns(&raw).map_err(|e| Error::Abi(format!("{}: {e}", C::SIGNATURE)))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<()> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt: Option<ReceiptStatus> = self
                .request_opt("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            match receipt.and_then(|r| r.status) {
                Some(status) if status == "0x1" => return Ok(()),
                Some(_) => return Err(Error::TransactionReverted(tx_hash.to_string())),
                None => tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_MS)).await,
            }
        }
        Err(Error::ReceiptNotFound(tx_hash.to_string()))
    }
}

#[async_trait]
impl StateReader for RpcChain {
    async fn default_oracle(&self, router: Address) -> Result<Address> {
        self.call(router, IOracleRouter::defaultOracleCall {}).await
    }

    async fn token_oracle(&self, router: Address, token: Address) -> Result<Address> {
        self.call(router, IOracleRouter::getTokenOracleCall { token })
            .await
    }

    async fn price_feed(&self, oracle: Address, token: Address) -> Result<Address> {
        self.call(oracle, IFeedOracle::priceFeedsCall { token }).await
    }

    async fn max_staleness(&self, oracle: Address, token: Address) -> Result<U256> {
        self.call(oracle, IStalenessOracle::maxStalenessCall { token })
            .await
    }

    async fn legacy_pool_registration(
        &self,
        oracle: Address,
        pool: Address,
    ) -> Result<Registration> {
        // The legacy oracle has no registration getter; `getPoolInfo` reverts
        // for unknown pools.
        match self
            .call(oracle, ILegacyPoolOracle::getPoolInfoCall { pool })
            .await
        {
            Ok(_) => Ok(Registration::Registered),
            Err(err) if err.is_revert() => {
                debug!(pool = %pool, reason = %err, "Legacy pool not registered");
                Ok(Registration::Absent)
            }
            Err(err) => Err(err),
        }
    }

    async fn pool_registration(&self, oracle: Address, pool: Address) -> Result<Registration> {
        let registered = self
            .call(oracle, IPoolOracle::isRegisteredCall { pool })
            .await?;
        Ok(registered.into())
    }
}

#[async_trait]
impl TransactionSender for RpcChain {
    async fn controls(&self, identity: Address) -> Result<bool> {
        Ok(self.accounts_mut().contains(&identity))
    }

    async fn send_transaction(&self, from: Address, tx: &PreparedTransaction) -> Result<B256> {
        let tx_hash: B256 = self
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": from,
                    "to": tx.to(),
                    "data": tx.data(),
                    "value": hex_quantity(tx.value()),
                }]),
            )
            .await?;
        debug!(from = %from, to = %tx.to(), tx_hash = %tx_hash, "Transaction submitted");

        self.wait_for_receipt(tx_hash).await?;
        Ok(tx_hash)
    }

    async fn impersonate(&self, identity: Address) -> Result<()> {
        let _: serde_json::Value = self
            .request_opt("hardhat_impersonateAccount", json!([identity]))
            .await?
            .unwrap_or_default();
        let balance = hex_quantity(U256::from(IMPERSONATION_BALANCE_WEI));
        let _: serde_json::Value = self
            .request_opt("hardhat_setBalance", json!([identity, balance]))
            .await?
            .unwrap_or_default();

        info!(identity = %identity, "Impersonating authority");
        self.accounts_mut().insert(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_code_maps_to_reverted() {
        let err: Error = RpcErrorObject {
            code: 3,
            message: "execution reverted: unknown pool".to_string(),
        }
        .into();
        assert!(err.is_revert());
    }

    #[test]
    fn test_revert_message_without_code() {
        let err: Error = RpcErrorObject {
            code: -32000,
            message: "VM Exception while processing transaction: revert".to_string(),
        }
        .into();
        assert!(err.is_revert());
    }

    #[test]
    fn test_other_rpc_errors_are_not_reverts() {
        let err: Error = RpcErrorObject {
            code: -32601,
            message: "method not found".to_string(),
        }
        .into();
        assert!(!err.is_revert());
        assert!(matches!(err, Error::Rpc { code: -32601, .. }));
    }

    #[test]
    fn test_response_with_null_result() {
        let response: RpcResponse<ReceiptStatus> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_request_envelope() {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "eth_call",
            params: json!([]),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "eth_call");
    }
}
