use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PriceOracleConfig;
use crate::error::FeedError;
use crate::supervisor::TaskSupervisor;

pub mod coingecko;

pub use coingecko::CoinGeckoPriceSource;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPrice {
    /// Price feed id the record was fetched for.
    pub id: String,
    pub price_usd: Decimal,
    /// Percent change over the last 24 hours.
    pub change_24h: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch prices for `ids`. Ids the source does not know are left out of the result.
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, TokenPrice>, FeedError>;
}

/// Periodically polls USD prices for a fixed set of feed ids.
pub struct PriceOracle {
    config: PriceOracleConfig,
    source: Arc<dyn PriceSource>,
    feeds: Vec<String>,
    prices: Arc<RwLock<HashMap<String, TokenPrice>>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl PriceOracle {
    pub fn new(config: PriceOracleConfig, source: Arc<dyn PriceSource>, feeds: Vec<String>) -> Self {
        Self {
            config,
            source,
            feeds,
            prices: Arc::new(RwLock::new(HashMap::new())),
            supervisor: Mutex::new(None),
        }
    }

    pub fn feeds(&self) -> &[String] {
        &self.feeds
    }

    pub async fn start(&self, ctx: &CancellationToken) {
        if !self.config.enabled {
            info!("Price oracle disabled, not starting");
            return;
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Price oracle already running");
            return;
        }

        let mut supervisor = TaskSupervisor::new(ctx);
        let token = supervisor.token();
        let source = self.source.clone();
        let feeds = self.feeds.clone();
        let prices = self.prices.clone();
        let period = self.config.update_interval();
        let request_timeout = self.config.request_timeout();

        supervisor.spawn("price-oracle", async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = refresh_prices(source.as_ref(), &feeds, &prices, request_timeout).await {
                            warn!("Price refresh failed: {}", e);
                        }
                    }
                }
            }
            debug!("Price oracle loop exited");
        });

        *guard = Some(supervisor);
        info!("Price oracle started with {} feeds, interval {:?}", self.feeds.len(), period);
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
            info!("Price oracle stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Run one fetch immediately. Returns the number of prices updated.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        refresh_prices(self.source.as_ref(), &self.feeds, &self.prices, self.config.request_timeout()).await
    }

    /// USD price for a feed id, zero when unknown.
    pub async fn get_price(&self, id: &str) -> Decimal {
        self.prices
            .read()
            .await
            .get(id)
            .map(|price| price.price_usd)
            .unwrap_or(Decimal::ZERO)
    }

    /// 24h percent change for a feed id, zero when unknown.
    pub async fn get_change_24h(&self, id: &str) -> Decimal {
        self.prices
            .read()
            .await
            .get(id)
            .map(|price| price.change_24h)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn get_token_price(&self, id: &str) -> Option<TokenPrice> {
        self.prices.read().await.get(id).cloned()
    }

    pub async fn all_prices(&self) -> HashMap<String, TokenPrice> {
        self.prices.read().await.clone()
    }
}

async fn refresh_prices(
    source: &dyn PriceSource,
    feeds: &[String],
    prices: &RwLock<HashMap<String, TokenPrice>>,
    request_timeout: std::time::Duration,
) -> Result<usize, FeedError> {
    if feeds.is_empty() {
        return Ok(0);
    }

    let fetched = timeout(request_timeout, source.fetch_prices(feeds))
        .await
        .map_err(|_| FeedError::InvalidResponse(format!("price fetch timed out after {:?}", request_timeout)))??;

    for id in feeds {
        if !fetched.contains_key(id) {
            debug!("No price returned for {}, keeping previous value", id);
        }
    }

    let updated = fetched.len();
    let mut cache = prices.write().await;
    for (id, price) in fetched {
        cache.insert(id, price);
    }
    debug!("Updated {} token prices", updated);
    Ok(updated)
}
