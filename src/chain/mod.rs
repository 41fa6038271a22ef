use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::ChainConfig;

pub mod manager;

pub use manager::ChainManager;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("all {attempts} RPC endpoints failed for {chain}")]
    AllEndpointsFailed { chain: String, attempts: usize },
    #[error("connection to {chain} failed: {reason}")]
    Connection { chain: String, reason: String },
    #[error("chain {0} is not connected")]
    NotConnected(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("no transaction signer configured for {0}")]
    SignerUnavailable(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("amount conversion failed: {0}")]
    AmountConversion(String),
}

/// Call parameters used for gas estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// Fully priced transaction handed to the signer.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub hash: B256,
    pub chain: String,
    pub status: TxStatus,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Wei per gas unit after multiplier and cap.
    pub gas_price: u128,
    pub submitted_at: DateTime<Utc>,
}

/// Connection state of one chain, as reported to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    pub running: bool,
    pub connected_endpoint: Option<String>,
    pub ws_connected: bool,
    pub last_block: u64,
    pub last_block_at: Option<DateTime<Utc>>,
}

/// A live handle to one chain node.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    async fn balance_at(&self, address: Address) -> Result<U256, ChainError>;

    async fn token_balance_at(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Suggested legacy gas price in wei.
    async fn suggest_gas_price(&self) -> Result<u128, ChainError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError>;

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    async fn send_raw_transaction(&self, signed: Bytes) -> Result<B256, ChainError>;
}

/// Dials chain endpoints. The wire protocol lives behind this seam.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, chain: &ChainConfig, endpoint: &str) -> Result<Arc<dyn ChainBackend>, ChainError>;

    /// New block heights pushed by a WebSocket endpoint.
    async fn subscribe_blocks(
        &self,
        chain: &ChainConfig,
        endpoint: &str,
    ) -> Result<BoxStream<'static, u64>, ChainError>;
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<Bytes, ChainError>;
}

const MAX_DECIMAL_SCALE: u8 = 28;

/// Scale a raw on-chain integer amount down by `decimals`.
///
/// Fractional digits that do not fit in a 96-bit mantissa are truncated.
/// Fails only when the whole-token part alone is out of range.
pub fn to_decimal_amount(raw: U256, decimals: u8) -> Result<Decimal, ChainError> {
    let ten = U256::from(10u8);
    let unit = ten
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| out_of_range(raw, decimals))?;
    let whole = u128::try_from(raw / unit).map_err(|_| out_of_range(raw, decimals))?;
    let fraction = raw % unit;

    for scale in (0..=decimals.min(MAX_DECIMAL_SCALE)).rev() {
        let Ok(kept) = u128::try_from(fraction / ten.pow(U256::from(decimals - scale))) else {
            continue;
        };
        let mantissa = 10u128
            .checked_pow(u32::from(scale))
            .and_then(|factor| whole.checked_mul(factor))
            .and_then(|scaled| scaled.checked_add(kept))
            .and_then(|mantissa| i128::try_from(mantissa).ok());
        let Some(mantissa) = mantissa else {
            continue;
        };
        if let Ok(amount) = Decimal::try_from_i128_with_scale(mantissa, u32::from(scale)) {
            return Ok(amount.normalize());
        }
    }

    Err(out_of_range(raw, decimals))
}

fn out_of_range(raw: U256, decimals: u8) -> ChainError {
    ChainError::AmountConversion(format!("{} with {} decimals is out of range", raw, decimals))
}
