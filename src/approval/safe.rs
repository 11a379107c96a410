//! Safe Transaction Service proposer.
//!
//! A batch becomes one `SafeTx`:
//!
//! ```text
//! 1 entry   → CALL         to=entry.to       data=entry.data
//! n entries → DELEGATECALL to=MultiSendCallOnly data=multiSend(packed entries)
//! ```
//!
//! The `SafeTx` is hashed under the Safe's EIP-712 domain, signed by the
//! delegate key and posted to the service. The `safeTxHash` doubles as the
//! proposal id. Owners approve and execute from the Safe UI.

use alloy::{
    primitives::{hex, Address, Bytes, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
    sol,
    sol_types::{SolCall, SolStruct},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    consts::PROPOSAL_ORIGIN,
    prelude::*,
    prepare::PreparedTransaction,
    req::HttpClient,
    serde_utils::{decimal_u256, safe_domain},
    Error,
};

use super::ApprovalService;

sol! {
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    interface IMultiSend {
        function multiSend(bytes transactions) external payable;
    }
}

/// Safe operation codes.
const OPERATION_CALL: u8 = 0;
const OPERATION_DELEGATECALL: u8 = 1;

/// Pack entries for `multiSend`: `uint8 op | address to | uint256 value |
/// uint256 len | bytes data`, concatenated without padding.
pub fn encode_multi_send(txs: &[PreparedTransaction]) -> Bytes {
    let mut packed = Vec::with_capacity(txs.iter().map(|tx| 85 + tx.data().len()).sum());
    for tx in txs {
        packed.push(OPERATION_CALL);
        packed.extend_from_slice(tx.to().as_slice());
        packed.extend_from_slice(&tx.value().to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(tx.data().len()).to_be_bytes::<32>());
        packed.extend_from_slice(tx.data());
    }
    Bytes::from(
        IMultiSend::multiSendCall {
            transactions: Bytes::from(packed),
        }
        .abi_encode(),
    )
}

/// Build the `SafeTx` proposing `txs` at `nonce`. `txs` must be non-empty.
pub fn build_safe_tx(txs: &[PreparedTransaction], multi_send: Address, nonce: U256) -> SafeTx {
    let (to, value, data, operation) = match txs {
        [single] => (single.to(), single.value(), single.data().clone(), OPERATION_CALL),
        _ => (
            multi_send,
            U256::ZERO,
            encode_multi_send(txs),
            OPERATION_DELEGATECALL,
        ),
    };
    SafeTx {
        to,
        value,
        data,
        operation,
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        nonce,
    }
}

/// First nonce not taken by the Safe or by a queued proposal.
pub fn next_nonce(safe_nonce: U256, queued: &[U256]) -> U256 {
    queued
        .iter()
        .filter(|n| **n >= safe_nonce)
        .map(|n| *n + U256::from(1u64))
        .fold(safe_nonce, |next, n| next.max(n))
}

#[derive(Deserialize, Debug)]
struct SafeInfo {
    #[serde(with = "decimal_u256")]
    nonce: U256,
}

#[derive(Deserialize, Debug)]
struct QueuedTransactions {
    #[serde(default)]
    results: Vec<QueuedTransaction>,
}

#[derive(Deserialize, Debug)]
struct QueuedTransaction {
    #[serde(with = "decimal_u256")]
    nonce: U256,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProposalRequest {
    to: String,
    value: String,
    data: Option<String>,
    operation: u8,
    safe_tx_gas: String,
    base_gas: String,
    gas_price: String,
    gas_token: String,
    refund_receiver: String,
    nonce: String,
    contract_transaction_hash: String,
    sender: String,
    signature: String,
    origin: &'static str,
}

impl ProposalRequest {
    fn new(safe_tx: &SafeTx, safe_tx_hash: B256, sender: Address, signature: &[u8]) -> Self {
        Self {
            to: safe_tx.to.to_checksum(None),
            value: safe_tx.value.to_string(),
            data: (!safe_tx.data.is_empty()).then(|| hex::encode_prefixed(&safe_tx.data)),
            operation: safe_tx.operation,
            safe_tx_gas: safe_tx.safeTxGas.to_string(),
            base_gas: safe_tx.baseGas.to_string(),
            gas_price: safe_tx.gasPrice.to_string(),
            gas_token: safe_tx.gasToken.to_checksum(None),
            refund_receiver: safe_tx.refundReceiver.to_checksum(None),
            nonce: safe_tx.nonce.to_string(),
            contract_transaction_hash: safe_tx_hash.to_string(),
            sender: sender.to_checksum(None),
            signature: hex::encode_prefixed(signature),
            origin: PROPOSAL_ORIGIN,
        }
    }
}

/// Client for one Safe on one Safe Transaction Service.
#[derive(Debug)]
pub struct SafeTransactionService {
    http_client: HttpClient,
    chain_id: u64,
    safe: Address,
    multi_send: Address,
    wallet: PrivateKeySigner,
}

impl SafeTransactionService {
    pub fn new(
        client: Option<Client>,
        service_url: &str,
        chain_id: u64,
        safe: Address,
        multi_send: Address,
        wallet: PrivateKeySigner,
    ) -> Self {
        Self {
            http_client: HttpClient::new(client, service_url),
            chain_id,
            safe,
            multi_send,
            wallet,
        }
    }

    /// Address of the delegate key.
    pub fn delegate(&self) -> Address {
        self.wallet.address()
    }

    /// EIP-712 `safeTxHash` of `safe_tx` for this Safe.
    pub fn safe_tx_hash(&self, safe_tx: &SafeTx) -> B256 {
        safe_tx.eip712_signing_hash(&safe_domain(self.chain_id, self.safe))
    }

    /// Sign `safe_tx_hash`. The signature is `r | s | v` with `v` in {27, 28}.
    pub fn sign(&self, safe_tx_hash: B256) -> Result<[u8; 65]> {
        let signature = self
            .wallet
            .sign_hash_sync(&safe_tx_hash)
            .map_err(|e| Error::signature_failure(e.to_string()))?;
        Ok(signature.as_bytes())
    }

    async fn pending_nonce(&self) -> Result<U256> {
        let safe = self.safe.to_checksum(None);

        let text = self.http_client.get(&format!("/api/v1/safes/{safe}/")).await?;
        let info: SafeInfo =
            serde_json::from_str(&text).map_err(|e| Error::json_parse(e.to_string()))?;

        let text = self
            .http_client
            .get(&format!(
                "/api/v1/safes/{safe}/multisig-transactions/?executed=false&nonce__gte={}",
                info.nonce
            ))
            .await?;
        let queued: QueuedTransactions =
            serde_json::from_str(&text).map_err(|e| Error::json_parse(e.to_string()))?;
        let queued: Vec<U256> = queued.results.iter().map(|tx| tx.nonce).collect();

        let nonce = next_nonce(info.nonce, &queued);
        debug!(safe_nonce = %info.nonce, queued = queued.len(), nonce = %nonce, "Resolved Safe nonce");
        Ok(nonce)
    }
}

#[async_trait]
impl ApprovalService for SafeTransactionService {
    async fn propose(&self, txs: &[PreparedTransaction], delegate: Address) -> Result<String> {
        if txs.is_empty() {
            return Err(Error::approval_unreachable("refusing to propose an empty batch"));
        }
        if self.delegate() != delegate {
            return Err(Error::approval_unreachable(format!(
                "delegate key resolves to {}, expected {delegate}",
                self.delegate()
            )));
        }

        let nonce = self.pending_nonce().await?;
        let safe_tx = build_safe_tx(txs, self.multi_send, nonce);
        let safe_tx_hash = self.safe_tx_hash(&safe_tx);
        let signature = self.sign(safe_tx_hash)?;

        let request = ProposalRequest::new(&safe_tx, safe_tx_hash, delegate, &signature);
        let body = serde_json::to_string(&request).map_err(|e| Error::json_parse(e.to_string()))?;
        self.http_client
            .post(
                &format!(
                    "/api/v1/safes/{}/multisig-transactions/",
                    self.safe.to_checksum(None)
                ),
                body,
            )
            .await?;

        info!(
            safe = %self.safe,
            nonce = %nonce,
            transactions = txs.len(),
            operation = safe_tx.operation,
            safe_tx_hash = %safe_tx_hash,
            "Proposed batch to Safe Transaction Service"
        );
        Ok(safe_tx_hash.to_string())
    }
}
