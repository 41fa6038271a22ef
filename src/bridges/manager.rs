use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{BridgeClient, BridgeError, BridgeQuote, BridgeRoute, QuoteRequest, TransactionStatus, TransferStatus};
use crate::config::BridgeConfig;
use crate::supervisor::TaskSupervisor;
use crate::types::{CrossChainTransaction, CrossChainTransferRequest};

const FEE_WEIGHT: f64 = 0.4;
const TIME_WEIGHT: f64 = 0.3;
const SUCCESS_WEIGHT: f64 = 0.3;
const MINUTES_PER_DAY: f64 = 1440.0;

type RouteIndex = HashMap<(String, String), Vec<BridgeRoute>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub protocol: String,
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Registry of bridge protocol clients and the routes they serve.
pub struct BridgeManager {
    config: BridgeConfig,
    clients: Vec<Arc<dyn BridgeClient>>,
    routes: Arc<RwLock<RouteIndex>>,
    health: Arc<RwLock<HashMap<String, BridgeHealth>>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl BridgeManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            clients: Vec::new(),
            routes: Arc::new(RwLock::new(HashMap::new())),
            health: Arc::new(RwLock::new(HashMap::new())),
            supervisor: Mutex::new(None),
        }
    }

    /// Register a protocol client. Registration order breaks score ties.
    pub fn add_client(&mut self, client: Arc<dyn BridgeClient>) {
        info!("Registered bridge protocol {}", client.protocol());
        self.clients.push(client);
    }

    pub fn protocols(&self) -> Vec<String> {
        self.clients.iter().map(|client| client.protocol().to_string()).collect()
    }

    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), BridgeError> {
        if !self.config.enabled {
            info!("Bridge manager disabled, not starting");
            return Ok(());
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Bridge manager already running");
            return Ok(());
        }

        let count = self.reload_routes().await;
        if count == 0 {
            warn!("Bridge manager started without any routes");
        }

        let mut supervisor = TaskSupervisor::new(ctx);

        if let Some(period) = self.config.route_refresh_interval() {
            let token = supervisor.token();
            let clients = self.clients.clone();
            let config = self.config.clone();
            let routes = self.routes.clone();
            supervisor.spawn("bridge-route-reload", async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let index = load_routes(&clients, &config).await;
                            *routes.write().await = index;
                        }
                    }
                }
            });
        }

        {
            let token = supervisor.token();
            let clients = self.clients.clone();
            let config = self.config.clone();
            let health = self.health.clone();
            let period = self.config.health_check_interval();
            supervisor.spawn("bridge-health-check", async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let report = check_clients(&clients, &config).await;
                            *health.write().await = report;
                        }
                    }
                }
            });
        }

        *guard = Some(supervisor);
        info!("Bridge manager started with {} protocols and {} routes", self.clients.len(), count);
        Ok(())
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
            info!("Bridge manager stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Replace the route index with a fresh load from every enabled client.
    pub async fn reload_routes(&self) -> usize {
        let index = load_routes(&self.clients, &self.config).await;
        let count = index.values().map(Vec::len).sum();
        *self.routes.write().await = index;
        count
    }

    pub async fn route_count(&self) -> usize {
        self.routes.read().await.values().map(Vec::len).sum()
    }

    pub async fn get_routes(&self, source_chain: &str, dest_chain: &str) -> Vec<BridgeRoute> {
        self.routes
            .read()
            .await
            .get(&(source_chain.to_string(), dest_chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Highest scoring enabled route for the pair and token.
    #[instrument(skip(self))]
    pub async fn get_optimal_bridge(
        &self,
        source_chain: &str,
        dest_chain: &str,
        token: &str,
    ) -> Result<BridgeRoute, BridgeError> {
        let routes = self.routes.read().await;
        let candidates = routes
            .get(&(source_chain.to_string(), dest_chain.to_string()))
            .into_iter()
            .flatten()
            .filter(|route| route.matches(source_chain, dest_chain, token));

        let mut best: Option<(&BridgeRoute, f64)> = None;
        for route in candidates {
            let score = calculate_route_score(route);
            debug!("Route {} via {} scored {:.4}", route.id, route.protocol, score);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((route, score)),
            }
        }

        let (route, score) = best.ok_or(BridgeError::NoRoutes)?;
        info!(
            "Selected {} for {} {} -> {} (score {:.4})",
            route.protocol, token, source_chain, dest_chain, score
        );
        Ok(route.clone())
    }

    fn client(&self, protocol: &str) -> Result<&Arc<dyn BridgeClient>, BridgeError> {
        let client = self
            .clients
            .iter()
            .find(|client| client.protocol() == protocol)
            .ok_or_else(|| BridgeError::UnknownProtocol(protocol.to_string()))?;

        if !self.config.is_protocol_enabled(protocol) {
            return Err(BridgeError::QuoteFailed(format!("bridge protocol {} is disabled", protocol)));
        }
        Ok(client)
    }

    pub async fn get_quote(
        &self,
        route: &BridgeRoute,
        amount: Decimal,
        slippage: Decimal,
    ) -> Result<BridgeQuote, BridgeError> {
        let client = self.client(&route.protocol)?;
        if !route.accepts_amount(amount) {
            return Err(BridgeError::AmountOutOfRange {
                amount,
                min: route.min_amount,
                max: route.max_amount,
            });
        }

        let request = QuoteRequest {
            route: route.clone(),
            amount,
            slippage,
        };
        with_timeout(&self.config, &route.protocol, client.get_quote(&request)).await
    }

    /// Quote the route and submit the source leg. Re-quotes once when the first quote is already stale.
    #[instrument(skip(self, route, request), fields(protocol = %route.protocol, route = %route.id))]
    pub async fn execute_transfer(
        &self,
        route: &BridgeRoute,
        request: &CrossChainTransferRequest,
    ) -> Result<CrossChainTransaction, BridgeError> {
        let mut quote = self.get_quote(route, request.amount, request.slippage).await?;

        if quote.is_expired(Utc::now()) {
            warn!("Quote {} from {} expired before execution, requesting a new one", quote.id, route.protocol);
            quote = self.get_quote(route, request.amount, request.slippage).await?;
            if quote.is_expired(Utc::now()) {
                return Err(BridgeError::QuoteExpired(quote.id));
            }
        }

        self.submit(quote, request).await
    }

    /// Execute a quote the caller already holds. Expired quotes are rejected.
    pub async fn execute_quote(
        &self,
        quote: BridgeQuote,
        request: &CrossChainTransferRequest,
    ) -> Result<CrossChainTransaction, BridgeError> {
        if quote.is_expired(Utc::now()) {
            return Err(BridgeError::QuoteExpired(quote.id));
        }
        self.submit(quote, request).await
    }

    async fn submit(
        &self,
        quote: BridgeQuote,
        request: &CrossChainTransferRequest,
    ) -> Result<CrossChainTransaction, BridgeError> {
        let client = self.client(&quote.protocol)?;
        let transfer = with_timeout(&self.config, &quote.protocol, client.execute_transfer(&quote, request)).await?;

        info!(
            "Submitted {} {} via {} ({} -> {}), source tx {}",
            quote.amount_in,
            request.token,
            quote.protocol,
            request.source_chain,
            request.dest_chain,
            transfer.source_tx_hash
        );

        Ok(CrossChainTransaction {
            id: transfer.transfer_id,
            status: TransferStatus::Pending,
            source_chain: request.source_chain.clone(),
            dest_chain: request.dest_chain.clone(),
            source_tx_hash: transfer.source_tx_hash,
            dest_tx_hash: None,
            token: request.token.clone(),
            amount: quote.amount_in,
            fee: quote.fee,
            bridge_protocol: quote.protocol,
            estimated_time: quote.estimated_time,
            from_address: request.from_address,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    pub async fn get_transfer_status(
        &self,
        protocol: &str,
        transfer_id: &str,
    ) -> Result<TransactionStatus, BridgeError> {
        let client = self.client(protocol)?;
        with_timeout(&self.config, protocol, client.get_transaction_status(transfer_id)).await
    }

    /// Run a health check on every enabled client now.
    pub async fn check_health(&self) -> HashMap<String, BridgeHealth> {
        let report = check_clients(&self.clients, &self.config).await;
        *self.health.write().await = report.clone();
        report
    }

    pub async fn health(&self) -> HashMap<String, BridgeHealth> {
        self.health.read().await.clone()
    }
}

/// `0.4 * (1 - fee/100) + 0.3 * (1 - minutes/1440) + 0.3 * success_rate`
pub fn calculate_route_score(route: &BridgeRoute) -> f64 {
    let fee = route.fee.to_f64().unwrap_or(100.0);
    let minutes = route.estimated_time as f64 / 60.0;

    let fee_score = 1.0 - fee / 100.0;
    let time_score = 1.0 - minutes / MINUTES_PER_DAY;
    let success_score = route.success_rate;

    FEE_WEIGHT * fee_score + TIME_WEIGHT * time_score + SUCCESS_WEIGHT * success_score
}

async fn with_timeout<T, F>(config: &BridgeConfig, protocol: &str, call: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    let limit = config.protocol_timeout(protocol);
    timeout(limit, call).await.map_err(|_| BridgeError::Timeout {
        protocol: protocol.to_string(),
        seconds: limit.as_secs(),
    })?
}

async fn load_routes(clients: &[Arc<dyn BridgeClient>], config: &BridgeConfig) -> RouteIndex {
    let mut index: RouteIndex = HashMap::new();

    for client in clients {
        let protocol = client.protocol();
        if !config.is_protocol_enabled(protocol) {
            debug!("Skipping routes of disabled protocol {}", protocol);
            continue;
        }

        match with_timeout(config, protocol, client.get_supported_routes()).await {
            Ok(routes) => {
                debug!("Loaded {} routes from {}", routes.len(), protocol);
                for route in routes {
                    index
                        .entry((route.source_chain.clone(), route.dest_chain.clone()))
                        .or_default()
                        .push(route);
                }
            }
            Err(e) => {
                let err = BridgeError::RouteLoad {
                    protocol: protocol.to_string(),
                    reason: e.to_string(),
                };
                warn!("{}", err);
            }
        }
    }

    index
}

async fn check_clients(clients: &[Arc<dyn BridgeClient>], config: &BridgeConfig) -> HashMap<String, BridgeHealth> {
    let mut report = HashMap::new();

    for client in clients {
        let protocol = client.protocol();
        if !config.is_protocol_enabled(protocol) {
            continue;
        }

        let (healthy, last_error) = match with_timeout(config, protocol, client.health_check()).await {
            Ok(healthy) => (healthy, None),
            Err(e) => {
                warn!("Health check failed for {}: {}", protocol, e);
                (false, Some(e.to_string()))
            }
        };

        report.insert(protocol.to_string(), BridgeHealth {
            protocol: protocol.to_string(),
            healthy,
            last_checked: Utc::now(),
            last_error,
        });
    }

    report
}
