//! Multi-chain wallet aggregation and cross-chain bridge routing.
//!
//! [`MultichainManager`] owns one [`ChainManager`] per configured network plus the
//! shared pollers ([`GasTracker`], [`PriceOracle`], [`PortfolioTracker`]) and the
//! [`BridgeManager`]. Chain access, signing, bridge clients and price feeds are
//! injected through the traits in [`chain`], [`bridges`], [`oracle`] and [`gas`].

pub mod bridges;
pub mod chain;
pub mod config;
pub mod error;
pub mod gas;
pub mod multichain;
pub mod oracle;
pub mod portfolio;
pub mod supervisor;
pub mod telemetry;
pub mod types;

pub use bridges::{
    BridgeClient, BridgeError, BridgeManager, BridgeQuote, BridgeRoute, BridgeTransfer, QuoteRequest,
    TransactionStatus, TransferStatus,
};
pub use chain::{
    ChainBackend, ChainConnector, ChainError, ChainManager, TransactionRequest, TransactionResult, TransactionSigner,
};
pub use config::{
    BridgeConfig, BridgeSettings, ChainConfig, GasConfig, LoggingConfig, MultichainConfig, PortfolioConfig,
    PriceOracleConfig, TokenConfig,
};
pub use error::{ConfigError, FeedError, MultichainError, Result, TransferValidationError};
pub use gas::{ChainGasSource, GasPrice, GasPriceSource, GasTracker};
pub use multichain::{Collaborators, MultichainManager};
pub use oracle::{CoinGeckoPriceSource, PriceOracle, PriceSource, TokenPrice};
pub use portfolio::{PortfolioPerformance, PortfolioSnapshot, PortfolioTracker};
pub use supervisor::TaskSupervisor;
pub use types::*;

pub use tokio_util::sync::CancellationToken;
