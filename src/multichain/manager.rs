use alloy_primitives::Address;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::risk::calculate_risk_metrics;
use super::validation::validate_transfer_request;
use crate::bridges::{BridgeClient, BridgeError, BridgeManager, TransferStatus};
use crate::chain::{ChainConnector, ChainManager, TransactionSigner};
use crate::config::{MultichainConfig, TokenConfig};
use crate::error::{MultichainError, Result};
use crate::gas::{ChainGasSource, GasPriceSource, GasTracker};
use crate::oracle::{PriceOracle, PriceSource};
use crate::portfolio::{PortfolioSnapshot, PortfolioTracker, SnapshotPerformance};
use crate::supervisor::TaskSupervisor;
use crate::types::{
    ChainStatus, CrossChainTransaction, CrossChainTransferRequest, NetworkStats, PortfolioSummary, SyncStatus,
    TokenHolding, UnifiedBalance, WalletInfo,
};

const BALANCE_CACHE_TTL_MINUTES: i64 = 10;
const STALE_POLL_INTERVALS: u32 = 4;
const TOP_TOKENS: usize = 10;
const RECENT_TRANSACTIONS: usize = 10;

/// External collaborators injected into the manager.
pub struct Collaborators {
    pub connector: Arc<dyn ChainConnector>,
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub bridge_clients: Vec<Arc<dyn BridgeClient>>,
    pub price_source: Arc<dyn PriceSource>,
    /// Defaults to tiers derived from each chain's suggested gas price.
    pub gas_source: Option<Arc<dyn GasPriceSource>>,
}

impl Collaborators {
    pub fn new(connector: Arc<dyn ChainConnector>, price_source: Arc<dyn PriceSource>) -> Self {
        Self {
            connector,
            signer: None,
            bridge_clients: Vec::new(),
            price_source,
            gas_source: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_bridge_client(mut self, client: Arc<dyn BridgeClient>) -> Self {
        self.bridge_clients.push(client);
        self
    }

    pub fn with_gas_source(mut self, source: Arc<dyn GasPriceSource>) -> Self {
        self.gas_source = Some(source);
        self
    }
}

#[derive(Debug, Clone)]
struct CachedBalances {
    balances: HashMap<String, UnifiedBalance>,
    updated_at: DateTime<Utc>,
}

type ChainMap = BTreeMap<String, Arc<ChainManager>>;

/// Owns every chain manager and the shared pollers, and merges their views per address.
pub struct MultichainManager {
    config: MultichainConfig,
    chains: Arc<ChainMap>,
    bridge_manager: Arc<BridgeManager>,
    gas_tracker: Arc<GasTracker>,
    price_oracle: Arc<PriceOracle>,
    portfolio_tracker: Arc<PortfolioTracker>,
    balance_cache: Arc<RwLock<HashMap<Address, CachedBalances>>>,
    chain_health: Arc<RwLock<HashMap<String, ChainStatus>>>,
    transfers: RwLock<Vec<CrossChainTransaction>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl MultichainManager {
    pub fn new(config: MultichainConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let price_oracle = Arc::new(PriceOracle::new(
            config.price_oracle_config.clone(),
            collaborators.price_source,
            config.price_feed_ids(),
        ));

        let mut chains = BTreeMap::new();
        for name in &config.supported_chains {
            let chain_config = config
                .get_chain_config(name)
                .cloned()
                .ok_or_else(|| MultichainError::NotFound {
                    kind: "chain config",
                    name: name.clone(),
                })?;
            let manager = ChainManager::new(
                name.clone(),
                chain_config,
                collaborators.connector.clone(),
                collaborators.signer.clone(),
                price_oracle.clone(),
            );
            chains.insert(name.clone(), Arc::new(manager));
        }

        let gas_source = match collaborators.gas_source {
            Some(source) => source,
            None => {
                let by_name = chains.iter().map(|(name, manager)| (name.clone(), manager.clone())).collect();
                let source: Arc<dyn GasPriceSource> = Arc::new(ChainGasSource::new(by_name));
                source
            }
        };
        let gas_tracker = Arc::new(GasTracker::new(config.gas_config.clone(), gas_source, config.enabled_chains()));

        let mut bridge_manager = BridgeManager::new(config.bridge_config.clone());
        for client in collaborators.bridge_clients {
            bridge_manager.add_client(client);
        }

        let portfolio_tracker = Arc::new(PortfolioTracker::new(config.portfolio_config.clone()));

        info!("Multichain manager created for {} chains", chains.len());
        Ok(Self {
            config,
            chains: Arc::new(chains),
            bridge_manager: Arc::new(bridge_manager),
            gas_tracker,
            price_oracle,
            portfolio_tracker,
            balance_cache: Arc::new(RwLock::new(HashMap::new())),
            chain_health: Arc::new(RwLock::new(HashMap::new())),
            transfers: RwLock::new(Vec::new()),
            supervisor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MultichainConfig {
        &self.config
    }

    pub fn chain_manager(&self, chain: &str) -> Option<Arc<ChainManager>> {
        self.chains.get(chain).cloned()
    }

    pub fn bridge_manager(&self) -> Arc<BridgeManager> {
        self.bridge_manager.clone()
    }

    pub fn gas_tracker(&self) -> Arc<GasTracker> {
        self.gas_tracker.clone()
    }

    pub fn price_oracle(&self) -> Arc<PriceOracle> {
        self.price_oracle.clone()
    }

    pub fn portfolio_tracker(&self) -> Arc<PortfolioTracker> {
        self.portfolio_tracker.clone()
    }

    /// Start every component. A component that fails to start is logged and skipped.
    #[instrument(skip(self, ctx))]
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        if !self.config.enabled {
            info!("Multichain manager disabled, not starting");
            return Ok(());
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Multichain manager already running");
            return Ok(());
        }

        info!("Starting multichain manager");
        let mut supervisor = TaskSupervisor::new(ctx);
        let child = supervisor.token();

        self.price_oracle.start(&child).await;

        for (name, chain) in self.chains.iter() {
            if let Err(e) = chain.start(&child).await {
                error!("Failed to start chain manager for {}: {}", name, e);
            }
        }

        if let Err(e) = self.bridge_manager.start(&child).await {
            error!("Failed to start bridge manager: {}", e);
        }

        self.gas_tracker.start(&child).await;
        self.portfolio_tracker.start(&child).await;

        refresh_chain_health(&self.chains, &self.chain_health).await;

        let token = supervisor.token();
        let chains = self.chains.clone();
        let chain_health = self.chain_health.clone();
        let balance_cache = self.balance_cache.clone();
        let period = self.config.update_interval();
        supervisor.spawn("multichain-update", async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        refresh_chain_health(&chains, &chain_health).await;
                        let removed = prune_balance_cache(&balance_cache, Utc::now()).await;
                        if removed > 0 {
                            debug!("Pruned {} cached balance entries", removed);
                        }
                    }
                }
            }
            debug!("Multichain update loop exited");
        });

        *guard = Some(supervisor);
        info!("Multichain manager started");
        Ok(())
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        let Some(supervisor) = supervisor else {
            return;
        };

        info!("Stopping multichain manager");
        supervisor.shutdown().await;

        self.portfolio_tracker.stop().await;
        self.gas_tracker.stop().await;
        self.bridge_manager.stop().await;
        for chain in self.chains.values() {
            chain.stop().await;
        }
        self.price_oracle.stop().await;

        info!("Multichain manager stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Balances of `address` merged across every enabled chain that answered.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn get_unified_balances(&self, address: Address) -> Result<HashMap<String, UnifiedBalance>> {
        let enabled: Vec<(&String, &Arc<ChainManager>)> =
            self.chains.iter().filter(|(_, chain)| chain.is_enabled()).collect();

        let results = join_all(
            enabled
                .iter()
                .map(|&(name, chain)| async move { (name.as_str(), chain.get_balances(address).await) }),
        )
        .await;

        let mut failed = Vec::new();
        let mut unified: HashMap<String, UnifiedBalance> = HashMap::new();

        for (chain_name, result) in results {
            let chain_balances = match result {
                Ok(balances) => balances,
                Err(e) => {
                    warn!("Failed to get balances for {} on {}: {}", address, chain_name, e);
                    failed.push(chain_name.to_string());
                    continue;
                }
            };

            for (symbol, balance) in chain_balances {
                if !unified.contains_key(&symbol) {
                    let token = self.token_config(chain_name, &symbol);
                    let price = self.price_oracle.get_price(&token.coingecko_id).await;
                    let change = self.price_oracle.get_change_24h(&token.coingecko_id).await;
                    unified.insert(symbol.clone(), UnifiedBalance::new(token, price, change));
                }
                if let Some(entry) = unified.get_mut(&symbol) {
                    entry.add_chain_balance(balance);
                }
            }
        }

        if !failed.is_empty() {
            let partial = MultichainError::PartialFailure {
                failed,
                total: enabled.len(),
            };
            warn!("Unified balances for {} are incomplete: {}", address, partial);
        }

        self.balance_cache.write().await.insert(address, CachedBalances {
            balances: unified.clone(),
            updated_at: Utc::now(),
        });

        debug!("Aggregated {} tokens for {}", unified.len(), address);
        Ok(unified)
    }

    fn token_config(&self, chain: &str, symbol: &str) -> TokenConfig {
        self.chains
            .get(chain)
            .and_then(|manager| manager.config().find_token(symbol).cloned())
            .unwrap_or_else(|| TokenConfig::unknown(symbol))
    }

    /// Last aggregation result for `address`, if still cached.
    pub async fn cached_unified_balances(&self, address: Address) -> Option<HashMap<String, UnifiedBalance>> {
        self.balance_cache
            .read()
            .await
            .get(&address)
            .map(|cached| cached.balances.clone())
    }

    /// Drop cache entries older than ten minutes relative to `now`.
    pub async fn prune_balance_cache(&self, now: DateTime<Utc>) -> usize {
        prune_balance_cache(&self.balance_cache, now).await
    }

    #[instrument(skip(self), fields(address = %address))]
    pub async fn get_wallet_info(&self, address: Address) -> Result<WalletInfo> {
        let balances = self.get_unified_balances(address).await?;

        let mut total_value_usd = Decimal::ZERO;
        let mut token_count = 0;
        for balance in balances.values() {
            if balance.total_balance > self.config.balance_threshold {
                total_value_usd += balance.total_value_usd;
                token_count += 1;
            }
        }

        let transactions = self.recent_transactions(address, RECENT_TRANSACTIONS).await;
        let last_activity = transactions.iter().map(|tx| tx.created_at).max();

        Ok(WalletInfo {
            address,
            chains: self.config.supported_chains.clone(),
            total_value_usd,
            token_count,
            balances,
            transactions,
            last_activity,
            generated_at: Utc::now(),
        })
    }

    #[instrument(skip(self), fields(address = %address))]
    pub async fn get_portfolio_summary(&self, address: Address) -> Result<PortfolioSummary> {
        let balances = self.get_unified_balances(address).await?;

        let mut total_value_usd = Decimal::ZERO;
        let mut change_24h = Decimal::ZERO;
        let mut chain_distribution: HashMap<String, Decimal> = HashMap::new();
        let mut token_distribution = HashMap::new();

        for balance in balances.values() {
            total_value_usd += balance.total_value_usd;
            change_24h += balance.total_value_usd * balance.change_24h / Decimal::ONE_HUNDRED;
            token_distribution.insert(balance.token.symbol.clone(), balance.total_value_usd);
            for (chain, chain_balance) in &balance.chain_balances {
                *chain_distribution.entry(chain.clone()).or_default() += chain_balance.value_usd;
            }
        }

        let change_24h_percent = if total_value_usd > Decimal::ZERO {
            change_24h / total_value_usd * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let mut top_tokens: Vec<TokenHolding> = balances
            .values()
            .map(|balance| TokenHolding {
                symbol: balance.token.symbol.clone(),
                balance: balance.total_balance,
                value_usd: balance.total_value_usd,
                share: if total_value_usd > Decimal::ZERO {
                    balance.total_value_usd / total_value_usd
                } else {
                    Decimal::ZERO
                },
            })
            .collect();
        top_tokens.sort_by(|a, b| b.value_usd.cmp(&a.value_usd).then_with(|| a.symbol.cmp(&b.symbol)));
        top_tokens.truncate(TOP_TOKENS);

        let risk_metrics = calculate_risk_metrics(&balances, total_value_usd);
        let now = Utc::now();

        if self.portfolio_tracker.is_enabled() {
            self.portfolio_tracker
                .add_snapshot(PortfolioSnapshot {
                    address,
                    timestamp: now,
                    total_value_usd,
                    balances: token_distribution.clone(),
                    performance: SnapshotPerformance {
                        change_24h,
                        change_24h_percent,
                    },
                    risk: risk_metrics.clone(),
                })
                .await;
        }

        Ok(PortfolioSummary {
            address,
            total_value_usd,
            change_24h,
            change_24h_percent,
            chain_distribution,
            token_distribution,
            top_tokens,
            risk_metrics,
            last_updated: now,
        })
    }

    /// Route and submit a cross-chain transfer. The result is `Pending` until refreshed.
    #[instrument(
        skip(self, request),
        fields(source = %request.source_chain, dest = %request.dest_chain, token = %request.token)
    )]
    pub async fn transfer_cross_chain(&self, request: CrossChainTransferRequest) -> Result<CrossChainTransaction> {
        validate_transfer_request(&request)?;

        for chain in [&request.source_chain, &request.dest_chain] {
            if !self.chains.contains_key(chain) {
                return Err(MultichainError::NotFound {
                    kind: "chain",
                    name: chain.clone(),
                });
            }
        }

        info!(
            "Initiating cross-chain transfer of {} {} from {} to {}",
            request.amount, request.token, request.source_chain, request.dest_chain
        );

        let route = self
            .bridge_manager
            .get_optimal_bridge(&request.source_chain, &request.dest_chain, &request.token)
            .await?;
        let transaction = self.bridge_manager.execute_transfer(&route, &request).await?;

        self.transfers.write().await.push(transaction.clone());
        info!("Cross-chain transfer {} submitted via {}", transaction.id, transaction.bridge_protocol);
        Ok(transaction)
    }

    /// Poll the bridge for a recorded transfer and store the outcome.
    pub async fn refresh_transfer(&self, transfer_id: &str) -> Result<CrossChainTransaction> {
        let current = self
            .transfers
            .read()
            .await
            .iter()
            .find(|tx| tx.id == transfer_id)
            .cloned()
            .ok_or_else(|| MultichainError::NotFound {
                kind: "transfer",
                name: transfer_id.to_string(),
            })?;

        if current.status.is_terminal() {
            return transfer_outcome(current);
        }

        let status = self
            .bridge_manager
            .get_transfer_status(&current.bridge_protocol, transfer_id)
            .await?;

        let updated = {
            let mut transfers = self.transfers.write().await;
            let Some(tx) = transfers.iter_mut().find(|tx| tx.id == transfer_id) else {
                return Err(MultichainError::NotFound {
                    kind: "transfer",
                    name: transfer_id.to_string(),
                });
            };
            tx.status = status.status;
            if status.dest_tx_hash.is_some() {
                tx.dest_tx_hash = status.dest_tx_hash.clone();
            }
            if status.status.is_terminal() {
                tx.completed_at = Some(status.updated_at);
            }
            tx.clone()
        };

        if matches!(updated.status, TransferStatus::Failed | TransferStatus::Refunded) {
            error!("Bridge leg of transfer {} ended as {}", updated.id, updated.status);
        }
        transfer_outcome(updated)
    }

    async fn recent_transactions(&self, address: Address, limit: usize) -> Vec<CrossChainTransaction> {
        let mut transactions: Vec<CrossChainTransaction> = self
            .transfers
            .read()
            .await
            .iter()
            .filter(|tx| tx.from_address == address)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(limit);
        transactions
    }

    pub fn get_supported_chains(&self) -> Vec<String> {
        self.config.supported_chains.clone()
    }

    /// Chain health as of the last update tick, computed on demand while stopped.
    pub async fn get_chain_status(&self) -> HashMap<String, ChainStatus> {
        if self.is_running().await {
            let cached = self.chain_health.read().await.clone();
            if !cached.is_empty() {
                return cached;
            }
        }
        refresh_chain_health(&self.chains, &self.chain_health).await
    }

    pub async fn get_network_stats(&self) -> NetworkStats {
        let chain_stats = self.get_chain_status().await;
        let active_chains = chain_stats.values().filter(|status| status.is_healthy).count();

        NetworkStats {
            total_chains: self.config.supported_chains.len(),
            active_chains,
            chain_stats,
            bridge_routes: self.bridge_manager.route_count().await,
            bridge_protocols: self.bridge_manager.protocols().len(),
            last_updated: Utc::now(),
        }
    }
}

/// A failed or refunded bridge leg is an error every time the transfer is refreshed.
fn transfer_outcome(tx: CrossChainTransaction) -> Result<CrossChainTransaction> {
    match tx.status {
        TransferStatus::Failed | TransferStatus::Refunded => Err(BridgeError::TransferFailed(format!(
            "bridge leg of transfer {} ended as {}; source transaction {} is not rolled back",
            tx.id, tx.status, tx.source_tx_hash
        ))
        .into()),
        _ => Ok(tx),
    }
}

async fn chain_status(name: &str, chain: &ChainManager, now: DateTime<Utc>) -> ChainStatus {
    let health = chain.status().await;
    let stale_after = ChronoDuration::from_std(chain.config().block_poll_interval() * STALE_POLL_INTERVALS)
        .unwrap_or_else(|_| ChronoDuration::minutes(1));

    let sync_status = if !health.running || health.connected_endpoint.is_none() {
        SyncStatus::Offline
    } else {
        match health.last_block_at {
            Some(at) if now - at <= stale_after => SyncStatus::Synced,
            _ => SyncStatus::Stale,
        }
    };

    ChainStatus {
        chain: name.to_string(),
        chain_id: chain.chain_id(),
        block_number: health.last_block,
        is_healthy: sync_status != SyncStatus::Offline,
        ws_connected: health.ws_connected,
        sync_status,
        last_updated: now,
    }
}

async fn refresh_chain_health(
    chains: &ChainMap,
    chain_health: &RwLock<HashMap<String, ChainStatus>>,
) -> HashMap<String, ChainStatus> {
    let now = Utc::now();
    let mut report = HashMap::new();
    for (name, chain) in chains {
        let status = chain_status(name, chain, now).await;
        if !status.is_healthy && chain.is_enabled() {
            debug!("Chain {} is offline", name);
        }
        report.insert(name.clone(), status);
    }

    *chain_health.write().await = report.clone();
    report
}

async fn prune_balance_cache(cache: &RwLock<HashMap<Address, CachedBalances>>, now: DateTime<Utc>) -> usize {
    let cutoff = now - ChronoDuration::minutes(BALANCE_CACHE_TTL_MINUTES);
    let mut cache = cache.write().await;
    let before = cache.len();
    cache.retain(|_, cached| cached.updated_at >= cutoff);
    before - cache.len()
}
