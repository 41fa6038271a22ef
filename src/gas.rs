use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::chain::ChainManager;
use crate::config::GasConfig;
use crate::error::FeedError;
use crate::supervisor::TaskSupervisor;

/// Gas price tiers for one chain, in wei.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GasPrice {
    pub chain: String,
    pub slow: u128,
    pub standard: u128,
    pub fast: u128,
    pub instant: u128,
    pub last_updated: DateTime<Utc>,
}

impl GasPrice {
    /// Tiers at 0.9x, 1x, 1.2x and 1.5x of the base price.
    pub fn from_base(chain: &str, base: u128) -> Self {
        Self {
            chain: chain.to_string(),
            slow: base.saturating_mul(9) / 10,
            standard: base,
            fast: base.saturating_mul(12) / 10,
            instant: base.saturating_mul(15) / 10,
            last_updated: Utc::now(),
        }
    }
}

#[async_trait]
pub trait GasPriceSource: Send + Sync {
    async fn fetch_gas_price(&self, chain: &str) -> Result<GasPrice, FeedError>;
}

/// Gas tiers derived from each chain node's suggested price.
pub struct ChainGasSource {
    chains: HashMap<String, Arc<ChainManager>>,
}

impl ChainGasSource {
    pub fn new(chains: HashMap<String, Arc<ChainManager>>) -> Self {
        Self { chains }
    }
}

#[async_trait]
impl GasPriceSource for ChainGasSource {
    async fn fetch_gas_price(&self, chain: &str) -> Result<GasPrice, FeedError> {
        let manager = self
            .chains
            .get(chain)
            .ok_or_else(|| FeedError::UnknownKey(chain.to_string()))?;
        let base = manager.suggest_gas_price().await?;
        Ok(GasPrice::from_base(chain, base))
    }
}

/// Periodically polls gas prices for every configured chain.
pub struct GasTracker {
    config: GasConfig,
    source: Arc<dyn GasPriceSource>,
    chains: Vec<String>,
    prices: Arc<RwLock<HashMap<String, GasPrice>>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl GasTracker {
    pub fn new(config: GasConfig, source: Arc<dyn GasPriceSource>, chains: Vec<String>) -> Self {
        Self {
            config,
            source,
            chains,
            prices: Arc::new(RwLock::new(HashMap::new())),
            supervisor: Mutex::new(None),
        }
    }

    pub async fn start(&self, ctx: &CancellationToken) {
        if !self.config.enabled {
            info!("Gas tracker disabled, not starting");
            return;
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Gas tracker already running");
            return;
        }

        let mut supervisor = TaskSupervisor::new(ctx);
        let token = supervisor.token();
        let source = self.source.clone();
        let chains = self.chains.clone();
        let prices = self.prices.clone();
        let period = self.config.update_interval();

        supervisor.spawn("gas-tracker", async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        refresh_gas_prices(source.as_ref(), &chains, &prices).await;
                    }
                }
            }
            debug!("Gas tracker loop exited");
        });

        *guard = Some(supervisor);
        info!("Gas tracker started for {} chains, interval {:?}", self.chains.len(), period);
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
            info!("Gas tracker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Poll every chain once. Returns the chains that failed.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Vec<String> {
        refresh_gas_prices(self.source.as_ref(), &self.chains, &self.prices).await
    }

    pub async fn get_gas_price(&self, chain: &str) -> Option<GasPrice> {
        self.prices.read().await.get(chain).cloned()
    }

    pub async fn all_gas_prices(&self) -> BTreeMap<String, GasPrice> {
        self.prices
            .read()
            .await
            .iter()
            .map(|(chain, price)| (chain.clone(), price.clone()))
            .collect()
    }
}

async fn refresh_gas_prices(
    source: &dyn GasPriceSource,
    chains: &[String],
    prices: &RwLock<HashMap<String, GasPrice>>,
) -> Vec<String> {
    let results = join_all(chains.iter().map(|chain| async move {
        (chain.clone(), source.fetch_gas_price(chain).await)
    }))
    .await;

    let mut fetched = Vec::new();
    let mut failed = Vec::new();
    for (chain, result) in results {
        match result {
            Ok(price) => fetched.push((chain, price)),
            Err(e) => {
                warn!("Failed to update gas price for {}: {}", chain, e);
                failed.push(chain);
            }
        }
    }

    let mut cache = prices.write().await;
    for (chain, price) in fetched {
        cache.insert(chain, price);
    }
    failed
}
