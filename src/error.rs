use rust_decimal::Decimal;
use thiserror::Error;

use crate::bridges::BridgeError;
use crate::chain::ChainError;

pub type Result<T> = std::result::Result<T, MultichainError>;

/// Top-level error surfaced by the multichain manager.
#[derive(Error, Debug)]
pub enum MultichainError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("connection error on {chain}: {reason}")]
    Connection { chain: String, reason: String },
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("invalid transfer request: {0}")]
    Validation(#[from] TransferValidationError),
    #[error("partial failure: {} of {total} chains failed ({})", .failed.len(), .failed.join(", "))]
    PartialFailure { failed: Vec<String>, total: usize },
    #[error("transfer failed: {0}")]
    Transfer(BridgeError),
    #[error("chain error: {0}")]
    Chain(ChainError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BridgeError> for MultichainError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::UnknownProtocol(name) => MultichainError::NotFound {
                kind: "bridge protocol",
                name,
            },
            other => MultichainError::Transfer(other),
        }
    }
}

impl From<ChainError> for MultichainError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::AllEndpointsFailed { chain, attempts } => MultichainError::Connection {
                chain,
                reason: format!("all {} endpoints failed", attempts),
            },
            ChainError::Connection { chain, reason } => MultichainError::Connection { chain, reason },
            other => MultichainError::Chain(other),
        }
    }
}

/// Every violation found while validating a configuration.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", .errors.join("; "))]
pub struct ConfigError {
    pub errors: Vec<String>,
}

impl ConfigError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

/// Reasons a cross-chain transfer request is rejected before routing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferValidationError {
    #[error("source chain is required")]
    MissingSourceChain,
    #[error("destination chain is required")]
    MissingDestChain,
    #[error("source and destination chains cannot be the same ({0})")]
    SameChain(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("from address is required")]
    ZeroFromAddress,
    #[error("to address is required")]
    ZeroToAddress,
    #[error("slippage must be between 0 and 1, got {0}")]
    SlippageOutOfRange(Decimal),
    #[error("transfer deadline {0} has passed")]
    DeadlinePassed(chrono::DateTime<chrono::Utc>),
}

/// Failure of a gas or price feed fetch.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("unknown feed key: {0}")]
    UnknownKey(String),
}
