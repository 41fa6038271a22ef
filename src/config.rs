use alloy_primitives::{address, Address};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ConfigError, MultichainError};

/// Top-level configuration for multichain wallet management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultichainConfig {
    pub enabled: bool,
    pub supported_chains: Vec<String>,
    pub default_chain: String,
    pub update_interval_seconds: u64,
    pub balance_threshold: Decimal,
    pub chain_configs: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub bridge_config: BridgeConfig,
    #[serde(default)]
    pub gas_config: GasConfig,
    #[serde(default)]
    pub price_oracle_config: PriceOracleConfig,
    #[serde(default)]
    pub portfolio_config: PortfolioConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_endpoints: Vec<String>,
    #[serde(default)]
    pub ws_endpoints: Vec<String>,
    #[serde(default)]
    pub explorer_url: String,
    pub native_token: TokenConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: Decimal,
    #[serde(default)]
    pub max_gas_price_gwei: Option<Decimal>,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u32,
    #[serde(default = "default_block_poll_interval")]
    pub block_poll_interval_seconds: u64,
    pub enabled: bool,
    #[serde(default)]
    pub priority: u8,
}

/// Immutable token reference data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenConfig {
    #[serde(default)]
    pub address: Option<Address>,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: u8,
    /// External price feed id (CoinGecko id).
    #[serde(default)]
    pub coingecko_id: String,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub is_stable: bool,
    #[serde(default)]
    pub min_balance: Decimal,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub enabled: bool,
    /// Per-protocol overrides. A protocol without an entry is enabled.
    #[serde(default)]
    pub protocols: HashMap<String, BridgeSettings>,
    /// 0 loads routes once at start.
    #[serde(default)]
    pub route_refresh_interval_seconds: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub enabled: bool,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    pub enabled: bool,
    pub update_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOracleConfig {
    pub enabled: bool,
    pub update_interval_seconds: u64,
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Feed ids polled in addition to the configured tokens.
    #[serde(default)]
    pub extra_feeds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub enabled: bool,
    pub update_interval_seconds: u64,
    pub history_retention_hours: u64,
    #[serde(default)]
    pub max_snapshots_per_address: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
}

/// Ten years.
pub const MAX_HISTORY_RETENTION_HOURS: u64 = 10 * 365 * 24;

fn default_gas_multiplier() -> Decimal {
    dec!(1.1)
}

fn default_confirmation_blocks() -> u32 {
    12
}

fn default_block_poll_interval() -> u64 {
    15
}

fn default_health_check_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

impl ChainConfig {
    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_secs(self.block_poll_interval_seconds.max(1))
    }

    /// Non-native tokens that are enabled for balance reads.
    pub fn enabled_tokens(&self) -> impl Iterator<Item = &TokenConfig> {
        self.tokens.iter().filter(|token| token.enabled)
    }

    pub fn find_token(&self, symbol: &str) -> Option<&TokenConfig> {
        if self.native_token.symbol == symbol {
            return Some(&self.native_token);
        }
        self.tokens.iter().find(|token| token.symbol == symbol)
    }
}

impl TokenConfig {
    pub fn native(symbol: &str, name: &str, coingecko_id: &str) -> Self {
        Self {
            address: None,
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals: 18,
            coingecko_id: coingecko_id.to_string(),
            is_native: true,
            is_stable: false,
            min_balance: Decimal::ZERO,
            enabled: true,
        }
    }

    pub fn erc20(
        address: Address,
        symbol: &str,
        name: &str,
        decimals: u8,
        coingecko_id: &str,
        is_stable: bool,
    ) -> Self {
        Self {
            address: Some(address),
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            coingecko_id: coingecko_id.to_string(),
            is_native: false,
            is_stable,
            min_balance: Decimal::ZERO,
            enabled: true,
        }
    }

    /// Fallback used when a symbol is seen on a chain without configuration.
    pub fn unknown(symbol: &str) -> Self {
        Self {
            address: None,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            coingecko_id: String::new(),
            is_native: false,
            is_stable: false,
            min_balance: Decimal::ZERO,
            enabled: true,
        }
    }
}

impl BridgeConfig {
    pub fn is_protocol_enabled(&self, protocol: &str) -> bool {
        self.protocols
            .get(protocol)
            .map(|settings| settings.enabled)
            .unwrap_or(true)
    }

    pub fn protocol_timeout(&self, protocol: &str) -> Duration {
        let seconds = self
            .protocols
            .get(protocol)
            .map(|settings| settings.timeout_seconds)
            .filter(|seconds| *seconds > 0)
            .unwrap_or(30);
        Duration::from_secs(seconds)
    }

    pub fn route_refresh_interval(&self) -> Option<Duration> {
        (self.route_refresh_interval_seconds > 0).then(|| Duration::from_secs(self.route_refresh_interval_seconds))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds.max(1))
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut protocols = HashMap::new();
        for name in ["hop", "across", "stargate", "synapse"] {
            protocols.insert(name.to_string(), BridgeSettings {
                enabled: true,
                timeout_seconds: 30,
            });
        }

        Self {
            enabled: true,
            protocols,
            route_refresh_interval_seconds: 0,
            health_check_interval_seconds: default_health_check_interval(),
        }
    }
}

impl GasConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds.max(1))
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_seconds: 30,
        }
    }
}

impl PriceOracleConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_seconds: 60,
            api_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            request_timeout_seconds: default_request_timeout(),
            extra_feeds: Vec::new(),
        }
    }
}

impl PortfolioConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds.max(1))
    }

    /// Oldest snapshot timestamp kept at `now`. `None` when the window reaches past chrono's range.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        i64::try_from(self.history_retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|retention| now.checked_sub_signed(retention))
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_seconds: 300,
            history_retention_hours: 24 * 30,
            max_snapshots_per_address: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl Default for MultichainConfig {
    fn default() -> Self {
        let mut chain_configs = HashMap::new();

        // Ethereum Mainnet
        chain_configs.insert("ethereum".to_string(), ChainConfig {
            chain_id: 1,
            name: "Ethereum".to_string(),
            rpc_endpoints: vec![
                "https://eth.llamarpc.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
                "https://ethereum.publicnode.com".to_string(),
            ],
            ws_endpoints: vec!["wss://ethereum.publicnode.com".to_string()],
            explorer_url: "https://etherscan.io".to_string(),
            native_token: TokenConfig::native("ETH", "Ether", "ethereum"),
            tokens: vec![
                TokenConfig::erc20(
                    address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                    "USDC",
                    "USD Coin",
                    6,
                    "usd-coin",
                    true,
                ),
                TokenConfig::erc20(
                    address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
                    "USDT",
                    "Tether USD",
                    6,
                    "tether",
                    true,
                ),
            ],
            gas_multiplier: dec!(1.1),
            max_gas_price_gwei: Some(dec!(500)),
            confirmation_blocks: 12,
            block_poll_interval_seconds: 15,
            enabled: true,
            priority: 1,
        });

        // Polygon
        chain_configs.insert("polygon".to_string(), ChainConfig {
            chain_id: 137,
            name: "Polygon".to_string(),
            rpc_endpoints: vec![
                "https://polygon-rpc.com".to_string(),
                "https://rpc.ankr.com/polygon".to_string(),
                "https://polygon.publicnode.com".to_string(),
            ],
            ws_endpoints: vec![],
            explorer_url: "https://polygonscan.com".to_string(),
            native_token: TokenConfig::native("MATIC", "Polygon", "matic-network"),
            tokens: vec![
                TokenConfig::erc20(
                    address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
                    "USDC",
                    "USD Coin",
                    6,
                    "usd-coin",
                    true,
                ),
                TokenConfig::erc20(
                    address!("c2132D05D31c914a87C6611C10748AEb04B58e8F"),
                    "USDT",
                    "Tether USD",
                    6,
                    "tether",
                    true,
                ),
            ],
            gas_multiplier: dec!(1.2),
            max_gas_price_gwei: Some(dec!(1000)),
            confirmation_blocks: 20,
            block_poll_interval_seconds: 5,
            enabled: true,
            priority: 2,
        });

        // Arbitrum One
        chain_configs.insert("arbitrum".to_string(), ChainConfig {
            chain_id: 42161,
            name: "Arbitrum One".to_string(),
            rpc_endpoints: vec![
                "https://arb1.arbitrum.io/rpc".to_string(),
                "https://rpc.ankr.com/arbitrum".to_string(),
                "https://arbitrum.publicnode.com".to_string(),
            ],
            ws_endpoints: vec![],
            explorer_url: "https://arbiscan.io".to_string(),
            native_token: TokenConfig::native("ETH", "Ether", "ethereum"),
            tokens: vec![
                TokenConfig::erc20(
                    address!("FF970A61A04b1cA14834A43f5dE4533eBDDB5CC8"),
                    "USDC",
                    "USD Coin",
                    6,
                    "usd-coin",
                    true,
                ),
                TokenConfig::erc20(
                    address!("Fd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
                    "USDT",
                    "Tether USD",
                    6,
                    "tether",
                    true,
                ),
            ],
            gas_multiplier: dec!(1.1),
            max_gas_price_gwei: None,
            confirmation_blocks: 1,
            block_poll_interval_seconds: 5,
            enabled: true,
            priority: 3,
        });

        Self {
            enabled: true,
            supported_chains: vec!["ethereum".to_string(), "polygon".to_string(), "arbitrum".to_string()],
            default_chain: "ethereum".to_string(),
            update_interval_seconds: 60,
            balance_threshold: dec!(0.000001),
            chain_configs,
            bridge_config: BridgeConfig::default(),
            gas_config: GasConfig::default(),
            price_oracle_config: PriceOracleConfig::default(),
            portfolio_config: PortfolioConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MultichainConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, MultichainError> {
        let path = path.as_ref();
        info!("Loading multichain configuration from: {}", path.display());

        if !path.exists() {
            warn!("Configuration file not found at {}, creating default config", path.display());
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)?;
        let config: MultichainConfig = serde_json::from_str(&content)?;

        info!("Multichain configuration loaded successfully");
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), MultichainError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        info!("Multichain configuration saved to: {}", path.as_ref().display());
        Ok(())
    }

    /// Default configuration overlaid with environment variables.
    pub fn load_from_env() -> Self {
        let mut config = Self::default();

        if let Ok(enabled) = env::var("MULTICHAIN_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(config.enabled);
        }

        if let Ok(default_chain) = env::var("MULTICHAIN_DEFAULT_CHAIN") {
            config.default_chain = default_chain;
        }

        if let Ok(interval) = env::var("MULTICHAIN_UPDATE_INTERVAL") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.update_interval_seconds = seconds;
            }
        }

        if let Ok(level) = env::var("MULTICHAIN_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(api_key) = env::var("PRICE_ORACLE_API_KEY") {
            config.price_oracle_config.api_key = Some(api_key);
        }

        for (chain_name, chain_config) in config.chain_configs.iter_mut() {
            let prefix = format!("CHAIN_{}", chain_name.to_uppercase());

            if let Ok(urls) = env::var(format!("{}_RPC_URLS", prefix)) {
                let endpoints: Vec<String> = urls
                    .split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect();
                if !endpoints.is_empty() {
                    info!("Loaded {} custom RPC endpoints for {}", endpoints.len(), chain_name);
                    chain_config.rpc_endpoints = endpoints;
                }
            }

            if let Ok(enabled) = env::var(format!("{}_ENABLED", prefix)) {
                chain_config.enabled = enabled.parse().unwrap_or(true);
            }
        }

        for (protocol, settings) in config.bridge_config.protocols.iter_mut() {
            let env_enabled = format!("BRIDGE_{}_ENABLED", protocol.to_uppercase());
            if let Ok(enabled) = env::var(&env_enabled) {
                settings.enabled = enabled.parse().unwrap_or(true);
            }
        }

        info!("Multichain configuration loaded from environment variables");
        config
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    pub fn get_chain_config(&self, chain: &str) -> Option<&ChainConfig> {
        self.chain_configs.get(chain)
    }

    /// Supported chains that have an enabled configuration, in declaration order.
    pub fn enabled_chains(&self) -> Vec<String> {
        self.supported_chains
            .iter()
            .filter(|name| self.chain_configs.get(*name).map(|c| c.enabled).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Price feed ids of every configured token plus the extra feeds.
    pub fn price_feed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for chain_name in &self.supported_chains {
            let Some(chain) = self.chain_configs.get(chain_name) else {
                continue;
            };
            let tokens = std::iter::once(&chain.native_token).chain(chain.enabled_tokens());
            for token in tokens {
                if !token.coingecko_id.is_empty() && !ids.contains(&token.coingecko_id) {
                    ids.push(token.coingecko_id.clone());
                }
            }
        }
        for feed in &self.price_oracle_config.extra_feeds {
            if !ids.contains(feed) {
                ids.push(feed.clone());
            }
        }
        ids
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.supported_chains.is_empty() {
            errors.push("At least one supported chain is required".to_string());
        }

        if self.default_chain.is_empty() {
            errors.push("Default chain is required".to_string());
        } else if !self.supported_chains.is_empty() && !self.supported_chains.contains(&self.default_chain) {
            errors.push(format!("Default chain {} is not a supported chain", self.default_chain));
        }

        if self.update_interval_seconds == 0 {
            errors.push("Update interval must be positive".to_string());
        }

        if self.balance_threshold.is_sign_negative() {
            errors.push("Balance threshold cannot be negative".to_string());
        }

        for chain_name in &self.supported_chains {
            match self.chain_configs.get(chain_name) {
                None => errors.push(format!("Chain {} has no configuration", chain_name)),
                Some(config) if config.enabled => {
                    if config.rpc_endpoints.is_empty() {
                        errors.push(format!("Chain {} has no RPC endpoints", chain_name));
                    }
                    if config.gas_multiplier <= Decimal::ZERO {
                        errors.push(format!("Chain {} has non-positive gas multiplier", chain_name));
                    }
                    if config.native_token.symbol.is_empty() {
                        errors.push(format!("Chain {} has no native token symbol", chain_name));
                    }
                }
                Some(_) => {}
            }
        }

        if self.gas_config.enabled && self.gas_config.update_interval_seconds == 0 {
            errors.push("Gas tracker enabled but update interval is zero".to_string());
        }

        if self.price_oracle_config.enabled && self.price_oracle_config.update_interval_seconds == 0 {
            errors.push("Price oracle enabled but update interval is zero".to_string());
        }

        if self.portfolio_config.enabled {
            if self.portfolio_config.update_interval_seconds == 0 {
                errors.push("Portfolio tracker enabled but update interval is zero".to_string());
            }
            if self.portfolio_config.history_retention_hours == 0 {
                errors.push("Portfolio history retention must be positive".to_string());
            } else if self.portfolio_config.history_retention_hours > MAX_HISTORY_RETENTION_HOURS {
                errors.push(format!(
                    "Portfolio history retention {}h exceeds the {}h maximum",
                    self.portfolio_config.history_retention_hours, MAX_HISTORY_RETENTION_HOURS
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(errors))
        }
    }
}
