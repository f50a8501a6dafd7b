/// Transaction-submitting registry client.
///
/// Builds an EIP-1559 `log(contentHash, step, metadataURI)` transaction,
/// signs it locally and sends the raw bytes over JSON-RPC. The node never
/// sees the key.
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::eip2930::AccessList;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::abi::AssuredRegistry;
use super::registry::{decode_registry_logs, RegistryClient};
use super::rpc::{self, RpcReceipt};
use super::{AnchorOutcome, RegistrySigner};
use crate::config::{ChainConfig, SignerConfig};
use crate::crypto::hash::ContentHash;
use crate::error::{LedgerError, Result};

/// Gas limit used when `eth_estimateGas` fails.
pub const FALLBACK_GAS: u64 = 200_000;

/// Estimated gas is padded by 20% plus a flat margin.
pub fn padded_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(6) / 5 + 5_000
}

pub struct SigningRegistryClient {
    registry: RegistryClient,
    signer: PrivateKeySigner,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    /// Serializes submissions so concurrent calls never race on a nonce.
    submit_lock: Mutex<()>,
}

impl SigningRegistryClient {
    pub fn new(registry: RegistryClient, signer_config: &SignerConfig) -> Result<Self> {
        let key = signer_config.private_key.expose();
        let signer: PrivateKeySigner = key
            .strip_prefix("0x")
            .unwrap_or(key)
            .parse()
            .map_err(|e| LedgerError::Signing(format!("invalid private key: {e}")))?;

        Ok(Self {
            registry,
            signer,
            max_fee_per_gas: signer_config.max_fee_per_gas,
            max_priority_fee_per_gas: signer_config.max_priority_fee_per_gas,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    fn config(&self) -> &ChainConfig {
        self.registry.config()
    }

    async fn nonce(&self) -> Result<u64> {
        let hex: String = self
            .registry
            .rpc()
            .call(
                "eth_getTransactionCount",
                serde_json::json!([self.address().to_string(), "pending"]),
            )
            .await?;
        rpc::parse_quantity(&hex)
    }

    async fn gas_limit(&self, calldata: &[u8]) -> u64 {
        let params = serde_json::json!([{
            "from": self.address().to_string(),
            "to": self.config().contract.to_string(),
            "data": rpc::encode_hex(calldata),
        }]);
        let estimate: Result<String> = self.registry.rpc().call("eth_estimateGas", params).await;
        match estimate.and_then(|hex| rpc::parse_quantity(&hex)) {
            Ok(gas) => padded_gas_limit(gas),
            Err(e) => {
                warn!(error = %e, fallback = FALLBACK_GAS, "Gas estimation failed");
                padded_gas_limit(FALLBACK_GAS)
            }
        }
    }

    /// Sign the transaction and return its EIP-2718 encoding.
    async fn sign(&self, tx: TxEip1559) -> Result<Vec<u8>> {
        let sig_hash = tx.signature_hash();
        let sig = self
            .signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| LedgerError::Signing(format!("signing failed: {e}")))?;

        let signed = TxEnvelope::Eip1559(tx.into_signed(sig));
        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);
        Ok(raw_tx)
    }

    /// Poll for the receipt until it appears or the timeout elapses.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<RpcReceipt> {
        let timeout = self.config().receipt_timeout;
        let poll = self.config().poll_interval.max(Duration::from_millis(1));
        let deadline = Instant::now() + timeout;

        loop {
            let receipt: Result<Option<RpcReceipt>> = self
                .registry
                .rpc()
                .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await;
            match receipt {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!(tx_hash, "Receipt not yet available"),
                Err(e) => warn!(tx_hash, error = %e, "Receipt poll failed"),
            }

            if Instant::now() + poll > deadline {
                return Err(LedgerError::ReceiptTimeout {
                    tx_hash: tx_hash.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl RegistrySigner for SigningRegistryClient {
    fn submitter(&self) -> String {
        self.address().to_checksum(None)
    }

    async fn log(
        &self,
        content_hash: &ContentHash,
        step: &str,
        metadata_uri: &str,
    ) -> Result<AnchorOutcome> {
        let _guard = self.submit_lock.lock().await;
        let config = self.config();

        let actual = self.registry.chain_id().await?;
        if actual != config.chain_id {
            return Err(LedgerError::ChainMismatch {
                expected: config.chain_id,
                actual,
            });
        }

        let calldata = AssuredRegistry::logCall {
            contentHash: B256::from(*content_hash.as_bytes()),
            step: step.to_string(),
            metadataURI: metadata_uri.to_string(),
        }
        .abi_encode();

        let nonce = self.nonce().await?;
        let gas_limit = self.gas_limit(&calldata).await;

        let tx = TxEip1559 {
            chain_id: config.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            to: TxKind::Call(config.contract),
            value: U256::ZERO,
            access_list: AccessList::default(),
            input: Bytes::from(calldata),
        };
        let raw_tx = self.sign(tx).await?;

        let tx_hash: String = self
            .registry
            .rpc()
            .call(
                "eth_sendRawTransaction",
                serde_json::json!([rpc::encode_hex(&raw_tx)]),
            )
            .await?;
        info!(tx_hash = %tx_hash, nonce, gas_limit, hash = %content_hash, step, "Submitted log transaction");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        if !receipt.succeeded() {
            return Err(LedgerError::Reverted(tx_hash));
        }

        let entry = decode_registry_logs(&receipt.logs, config.contract)?
            .into_iter()
            .find(|e| e.content_hash == *content_hash)
            .ok_or_else(|| LedgerError::MissingEvent(tx_hash.clone()))?;

        let block_number = receipt.block()?;
        info!(
            tx_hash = %tx_hash,
            entry_id = entry.id,
            block = ?block_number,
            gas_used = ?receipt.gas().ok().flatten(),
            "Log transaction confirmed"
        );

        Ok(AnchorOutcome {
            tx_hash,
            entry_id: entry.id,
            block_number,
            contract: config.contract.to_checksum(None),
            chain_id: config.chain_id,
        })
    }
}
