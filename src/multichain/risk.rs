use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use crate::types::{RiskLevel, RiskMetrics, UnifiedBalance};

const HIGH_CONCENTRATION: Decimal = dec!(0.7);
const HIGH_CHAIN_SHARE: Decimal = dec!(0.9);
const MEDIUM_CONCENTRATION: Decimal = dec!(0.4);
const MEDIUM_CHAIN_SHARE: Decimal = dec!(0.7);

/// Concentration, chain and liquidity exposure of a balance map.
pub fn calculate_risk_metrics(balances: &HashMap<String, UnifiedBalance>, total_value: Decimal) -> RiskMetrics {
    if total_value <= Decimal::ZERO {
        return RiskMetrics::default();
    }

    let concentration = balances
        .values()
        .map(|balance| balance.total_value_usd / total_value)
        .max()
        .unwrap_or(Decimal::ZERO);

    let mut chain_values: HashMap<&str, Decimal> = HashMap::new();
    for balance in balances.values() {
        for (chain, chain_balance) in &balance.chain_balances {
            *chain_values.entry(chain.as_str()).or_default() += chain_balance.value_usd;
        }
    }
    let chain_risk = chain_values
        .values()
        .map(|value| *value / total_value)
        .max()
        .unwrap_or(Decimal::ZERO);

    let illiquid: Decimal = balances
        .values()
        .filter(|balance| !balance.token.is_native && !balance.token.is_stable)
        .map(|balance| balance.total_value_usd)
        .sum();
    let liquidity_risk = illiquid / total_value;

    let mut recommendations = Vec::new();
    if concentration > MEDIUM_CONCENTRATION {
        recommendations.push("Consider diversifying token holdings".to_string());
    }
    if chain_risk > MEDIUM_CHAIN_SHARE {
        recommendations.push("Consider diversifying across more chains".to_string());
    }

    let overall_risk = if concentration > HIGH_CONCENTRATION || chain_risk > HIGH_CHAIN_SHARE {
        RiskLevel::High
    } else if concentration > MEDIUM_CONCENTRATION || chain_risk > MEDIUM_CHAIN_SHARE {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskMetrics {
        concentration_risk: concentration,
        chain_risk,
        token_risk: concentration,
        liquidity_risk,
        overall_risk,
        recommendations,
    }
}
