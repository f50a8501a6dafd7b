/// Process configuration, read once at start-up.
///
/// Nothing here is global: the binary builds an [`AppConfig`] from the
/// environment and hands the pieces to the clients that need them.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::Address;

use crate::crypto::sensitive::SensitiveString;
use crate::error::{LedgerError, Result};

pub const ENV_RPC_URL: &str = "WEB3_PROVIDER_URL";
pub const ENV_CONTRACT: &str = "CONTRACT_ADDRESS";
pub const ENV_CHAIN_ID: &str = "CHAIN_ID";
pub const ENV_PRIVATE_KEY: &str = "ACCOUNT_PRIVATE_KEY";
pub const ENV_DATA_DIR: &str = "ASSURED_DATA_DIR";
pub const ENV_BIND_ADDR: &str = "ASSURED_BIND_ADDR";
pub const ENV_RECEIPT_TIMEOUT: &str = "ASSURED_RECEIPT_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL: &str = "ASSURED_POLL_INTERVAL_MS";
pub const ENV_LOG_PAGE_BLOCKS: &str = "ASSURED_LOG_PAGE_BLOCKS";
pub const ENV_DEPLOY_BLOCK: &str = "ASSURED_DEPLOY_BLOCK";
pub const ENV_MAX_FEE_GWEI: &str = "ASSURED_MAX_FEE_GWEI";
pub const ENV_PRIORITY_FEE_GWEI: &str = "ASSURED_PRIORITY_FEE_GWEI";

/// Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

const GWEI: u128 = 1_000_000_000;

/// Read-side connection to the registry contract.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// `AssuredRegistry` contract address.
    pub contract: Address,
    pub chain_id: u64,
    /// How long to wait for a transaction receipt.
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
    /// Block span of a single `eth_getLogs` request.
    pub log_page_blocks: u64,
    /// First block worth scanning for `Logged` events.
    pub deploy_block: u64,
}

impl ChainConfig {
    pub fn new(rpc_url: impl Into<String>, contract: Address, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract,
            chain_id,
            receipt_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2_000),
            log_page_blocks: 10_000,
            deploy_block: 0,
        }
    }
}

/// Write-side settings: the signing key and EIP-1559 fee caps.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    /// Hex private key (with or without `0x`).
    pub private_key: SensitiveString,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl SignerConfig {
    pub fn new(private_key: SensitiveString) -> Self {
        Self {
            private_key,
            max_fee_per_gas: 3 * GWEI,
            max_priority_fee_per_gas: GWEI,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root holding one directory per project.
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// `None` when no RPC endpoint is configured (offline capture only).
    pub chain: Option<ChainConfig>,
    /// `None` when no private key is configured (read-only ledger access).
    pub signer: Option<SignerConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/projects"));
        let bind_addr = parse_or(
            get(ENV_BIND_ADDR),
            ENV_BIND_ADDR,
            SocketAddr::from(([127, 0, 0, 1], 8080)),
        )?;

        let chain = match (get(ENV_RPC_URL), get(ENV_CONTRACT)) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(LedgerError::Config(format!("{ENV_CONTRACT} missing")));
            }
            (None, Some(_)) => {
                return Err(LedgerError::Config(format!("{ENV_RPC_URL} missing")));
            }
            (Some(rpc_url), Some(contract)) => {
                let contract: Address = contract.parse().map_err(|e| {
                    LedgerError::Config(format!("{ENV_CONTRACT} is not an address: {e}"))
                })?;
                let chain_id = parse_or(get(ENV_CHAIN_ID), ENV_CHAIN_ID, DEFAULT_CHAIN_ID)?;

                let mut chain = ChainConfig::new(rpc_url, contract, chain_id);
                chain.receipt_timeout = Duration::from_secs(parse_or(
                    get(ENV_RECEIPT_TIMEOUT),
                    ENV_RECEIPT_TIMEOUT,
                    chain.receipt_timeout.as_secs(),
                )?);
                chain.poll_interval = Duration::from_millis(parse_or(
                    get(ENV_POLL_INTERVAL),
                    ENV_POLL_INTERVAL,
                    2_000u64,
                )?);
                chain.log_page_blocks =
                    parse_or(get(ENV_LOG_PAGE_BLOCKS), ENV_LOG_PAGE_BLOCKS, 10_000u64)?;
                if chain.log_page_blocks == 0 {
                    return Err(LedgerError::Config(format!(
                        "{ENV_LOG_PAGE_BLOCKS} must be positive"
                    )));
                }
                chain.deploy_block = parse_or(get(ENV_DEPLOY_BLOCK), ENV_DEPLOY_BLOCK, 0u64)?;
                Some(chain)
            }
        };

        let signer = match get(ENV_PRIVATE_KEY) {
            None => None,
            Some(_) if chain.is_none() => {
                return Err(LedgerError::Config(format!(
                    "{ENV_PRIVATE_KEY} set without {ENV_RPC_URL} and {ENV_CONTRACT}"
                )));
            }
            Some(key) => {
                let mut signer = SignerConfig::new(SensitiveString::new(key));
                let max_fee: u128 = parse_or(get(ENV_MAX_FEE_GWEI), ENV_MAX_FEE_GWEI, 3u128)?;
                let priority: u128 =
                    parse_or(get(ENV_PRIORITY_FEE_GWEI), ENV_PRIORITY_FEE_GWEI, 1u128)?;
                if priority > max_fee {
                    return Err(LedgerError::Config(format!(
                        "{ENV_PRIORITY_FEE_GWEI} exceeds {ENV_MAX_FEE_GWEI}"
                    )));
                }
                signer.max_fee_per_gas = max_fee * GWEI;
                signer.max_priority_fee_per_gas = priority * GWEI;
                Some(signer)
            }
        };

        Ok(Self {
            data_dir,
            bind_addr,
            chain,
            signer,
        })
    }

    pub fn require_chain(&self) -> Result<&ChainConfig> {
        self.chain
            .as_ref()
            .ok_or_else(|| LedgerError::Config(format!("{ENV_RPC_URL} missing")))
    }

    pub fn require_signer(&self) -> Result<&SignerConfig> {
        self.signer
            .as_ref()
            .ok_or_else(|| LedgerError::Config(format!("{ENV_PRIVATE_KEY} missing")))
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|e| LedgerError::Config(format!("{key}='{value}': {e}"))),
        None => Ok(default),
    }
}
