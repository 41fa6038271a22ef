use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::CrossChainTransferRequest;

pub mod manager;

pub use manager::{BridgeHealth, BridgeManager};

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("no bridge routes available")]
    NoRoutes,
    #[error("unknown bridge protocol: {0}")]
    UnknownProtocol(String),
    #[error("quote failed: {0}")]
    QuoteFailed(String),
    #[error("quote {0} expired")]
    QuoteExpired(String),
    #[error("amount {amount} outside route range [{min}, {max}]")]
    AmountOutOfRange { amount: Decimal, min: Decimal, max: Decimal },
    #[error("transfer execution failed: {0}")]
    TransferFailed(String),
    #[error("transfer status unavailable: {0}")]
    StatusUnavailable(String),
    #[error("{protocol} did not respond within {seconds}s")]
    Timeout { protocol: String, seconds: u64 },
    #[error("failed to load routes from {protocol}: {reason}")]
    RouteLoad { protocol: String, reason: String },
}

/// A directed transfer path offered by one bridge protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeRoute {
    pub id: String,
    pub protocol: String,
    pub source_chain: String,
    pub dest_chain: String,
    pub token: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Percent of the transferred amount.
    pub fee: Decimal,
    /// Seconds.
    pub estimated_time: u64,
    pub liquidity: Decimal,
    /// Historical success ratio between 0 and 1.
    pub success_rate: f64,
    pub enabled: bool,
}

impl BridgeRoute {
    pub fn matches(&self, source_chain: &str, dest_chain: &str, token: &str) -> bool {
        self.enabled && self.source_chain == source_chain && self.dest_chain == dest_chain && self.token == token
    }

    pub fn accepts_amount(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteRequest {
    pub route: BridgeRoute,
    pub amount: Decimal,
    pub slippage: Decimal,
}

/// A time-bounded fee commitment for one route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeQuote {
    pub id: String,
    pub protocol: String,
    pub route: BridgeRoute,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub fee: Decimal,
    pub estimated_time: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BridgeQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Source leg of a submitted transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub transfer_id: String,
    pub source_tx_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Refunded,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Refunded)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub status: TransferStatus,
    pub dest_tx_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Network client of one bridge protocol.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    fn protocol(&self) -> &str;

    async fn get_supported_routes(&self) -> Result<Vec<BridgeRoute>, BridgeError>;

    async fn get_quote(&self, request: &QuoteRequest) -> Result<BridgeQuote, BridgeError>;

    async fn execute_transfer(
        &self,
        quote: &BridgeQuote,
        request: &CrossChainTransferRequest,
    ) -> Result<BridgeTransfer, BridgeError>;

    async fn get_transaction_status(&self, transfer_id: &str) -> Result<TransactionStatus, BridgeError>;

    async fn health_check(&self) -> Result<bool, BridgeError> {
        Ok(true)
    }
}
