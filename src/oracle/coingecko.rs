use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error};

use super::{PriceSource, TokenPrice};
use crate::config::PriceOracleConfig;
use crate::error::FeedError;

/// Price source backed by the CoinGecko `simple/price` endpoint.
pub struct CoinGeckoPriceSource {
    http_client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl CoinGeckoPriceSource {
    pub fn from_config(config: &PriceOracleConfig) -> Result<Self, FeedError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("multichain-wallet/0.1")
            .build()?;

        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn price_url(&self, ids: &[String]) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
            self.api_url,
            ids.join(",")
        )
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, TokenPrice>, FeedError> {
        let url = self.price_url(ids);
        let mut request = self.http_client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            error!("CoinGecko API error: status {}", response.status());
            return Err(FeedError::InvalidResponse(format!("status {}", response.status())));
        }

        let body = response.text().await?;
        let prices = parse_simple_price(&body)?;
        debug!("Fetched {} of {} prices from CoinGecko", prices.len(), ids.len());
        Ok(prices)
    }
}

/// Parse a `simple/price` body of the form `{"ethereum": {"usd": 2000.0, "usd_24h_change": 1.2}}`.
pub fn parse_simple_price(body: &str) -> Result<HashMap<String, TokenPrice>, FeedError> {
    if body.trim().is_empty() {
        return Err(FeedError::InvalidResponse("empty response body".to_string()));
    }

    let data: Value = serde_json::from_str(body)
        .map_err(|e| FeedError::InvalidResponse(format!("failed to parse price response: {}", e)))?;
    let entries = data
        .as_object()
        .ok_or_else(|| FeedError::InvalidResponse("price response is not an object".to_string()))?;

    let now = Utc::now();
    let mut prices = HashMap::new();
    for (id, entry) in entries {
        let Some(usd) = entry.get("usd").and_then(Value::as_f64).and_then(Decimal::from_f64) else {
            debug!("No USD price in response for {}", id);
            continue;
        };
        let change = entry
            .get("usd_24h_change")
            .and_then(Value::as_f64)
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO);

        prices.insert(id.clone(), TokenPrice {
            id: id.clone(),
            price_usd: usd,
            change_24h: change,
            last_updated: now,
        });
    }

    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_simple_price() {
        let body = r#"{"ethereum":{"usd":2000.5,"usd_24h_change":-1.25},"usd-coin":{"usd":1.0}}"#;
        let prices = parse_simple_price(body).unwrap();

        assert_eq!(prices["ethereum"].price_usd, dec!(2000.5));
        assert_eq!(prices["ethereum"].change_24h, dec!(-1.25));
        assert_eq!(prices["usd-coin"].change_24h, Decimal::ZERO);
    }

    #[test]
    fn test_parse_skips_entries_without_usd() {
        let body = r#"{"ethereum":{"eur":1800.0}}"#;
        assert!(parse_simple_price(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_simple_price(""), Err(FeedError::InvalidResponse(_))));
        assert!(matches!(parse_simple_price("[1,2]"), Err(FeedError::InvalidResponse(_))));
        assert!(matches!(parse_simple_price("<html>"), Err(FeedError::InvalidResponse(_))));
    }

    #[test]
    fn test_price_url_includes_change() {
        let source = CoinGeckoPriceSource::from_config(&PriceOracleConfig::default()).unwrap();
        let url = source.price_url(&["ethereum".to_string(), "tether".to_string()]);
        assert_eq!(
            url,
            "https://api.coingecko.com/api/v3/simple/price?ids=ethereum,tether&vs_currencies=usd&include_24hr_change=true"
        );
    }
}
