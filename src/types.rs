use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bridges::TransferStatus;
use crate::config::TokenConfig;

/// One token's balance on one chain at the time of the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainBalance {
    pub chain: String,
    pub symbol: String,
    pub balance: Decimal,
    pub value_usd: Decimal,
    pub address: Address,
    pub block_number: u64,
    pub available: Decimal,
    pub pending: Decimal,
    pub locked: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// A token's balance aggregated across every chain for one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedBalance {
    pub token: TokenConfig,
    pub total_balance: Decimal,
    pub total_value_usd: Decimal,
    pub chain_balances: HashMap<String, ChainBalance>,
    pub last_updated: DateTime<Utc>,
    pub price_usd: Decimal,
    /// 24h price change in percent.
    pub change_24h: Decimal,
}

impl UnifiedBalance {
    pub fn new(token: TokenConfig, price_usd: Decimal, change_24h: Decimal) -> Self {
        Self {
            token,
            total_balance: Decimal::ZERO,
            total_value_usd: Decimal::ZERO,
            chain_balances: HashMap::new(),
            last_updated: DateTime::<Utc>::MIN_UTC,
            price_usd,
            change_24h,
        }
    }

    pub fn add_chain_balance(&mut self, balance: ChainBalance) {
        self.total_balance += balance.balance;
        self.total_value_usd += balance.value_usd;
        if balance.last_updated > self.last_updated {
            self.last_updated = balance.last_updated;
        }
        self.chain_balances.insert(balance.chain.clone(), balance);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: Address,
    pub chains: Vec<String>,
    pub total_value_usd: Decimal,
    pub token_count: usize,
    pub balances: HashMap<String, UnifiedBalance>,
    pub transactions: Vec<CrossChainTransaction>,
    pub last_activity: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHolding {
    pub symbol: String,
    pub balance: Decimal,
    pub value_usd: Decimal,
    pub share: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub address: Address,
    pub total_value_usd: Decimal,
    /// USD change over 24h implied by each token's percent change.
    pub change_24h: Decimal,
    pub change_24h_percent: Decimal,
    pub chain_distribution: HashMap<String, Decimal>,
    pub token_distribution: HashMap<String, Decimal>,
    pub top_tokens: Vec<TokenHolding>,
    pub risk_metrics: RiskMetrics,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskMetrics {
    pub concentration_risk: Decimal,
    pub chain_risk: Decimal,
    pub token_risk: Decimal,
    pub liquidity_risk: Decimal,
    pub overall_risk: RiskLevel,
    pub recommendations: Vec<String>,
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self {
            concentration_risk: Decimal::ZERO,
            chain_risk: Decimal::ZERO,
            token_risk: Decimal::ZERO,
            liquidity_risk: Decimal::ZERO,
            overall_risk: RiskLevel::Low,
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainTransferRequest {
    pub source_chain: String,
    pub dest_chain: String,
    pub token: String,
    pub amount: Decimal,
    pub from_address: Address,
    pub to_address: Address,
    /// Fraction between 0 and 1.
    pub slippage: Decimal,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainTransaction {
    pub id: String,
    pub status: TransferStatus,
    pub source_chain: String,
    pub dest_chain: String,
    pub source_tx_hash: String,
    pub dest_tx_hash: Option<String>,
    pub token: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub bridge_protocol: String,
    /// Seconds.
    pub estimated_time: u64,
    pub from_address: Address,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Stale,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub is_healthy: bool,
    pub ws_connected: bool,
    pub sync_status: SyncStatus,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_chains: usize,
    pub active_chains: usize,
    pub chain_stats: HashMap<String, ChainStatus>,
    pub bridge_routes: usize,
    pub bridge_protocols: usize,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(chain: &str, amount: Decimal, value: Decimal, at: DateTime<Utc>) -> ChainBalance {
        ChainBalance {
            chain: chain.to_string(),
            symbol: "ETH".to_string(),
            balance: amount,
            value_usd: value,
            address: Address::ZERO,
            block_number: 1,
            available: amount,
            pending: Decimal::ZERO,
            locked: Decimal::ZERO,
            last_updated: at,
        }
    }

    #[test]
    fn test_unified_balance_sums_and_tracks_latest_update() {
        let early = Utc::now() - chrono::Duration::seconds(30);
        let late = Utc::now();

        let mut unified = UnifiedBalance::new(TokenConfig::native("ETH", "Ether", "ethereum"), dec!(2000), dec!(1.5));
        unified.add_chain_balance(balance("arbitrum", dec!(1.75), dec!(3500), late));
        unified.add_chain_balance(balance("ethereum", dec!(3.5), dec!(7000), early));

        assert_eq!(unified.total_balance, dec!(5.25));
        assert_eq!(unified.total_value_usd, dec!(10500));
        assert_eq!(unified.last_updated, late);
        assert_eq!(unified.chain_balances.len(), 2);
    }

    #[test]
    fn test_risk_level_serializes_lowercase() {
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, "\"high\"");
        assert_eq!(RiskLevel::Medium.to_string(), "medium");
    }
}
