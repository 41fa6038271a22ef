use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    to_decimal_amount, CallRequest, ChainBackend, ChainConnector, ChainError, ChainHealth, TransactionRequest,
    TransactionResult, TransactionSigner, TxStatus, UnsignedTransaction,
};
use crate::config::{ChainConfig, TokenConfig};
use crate::oracle::PriceOracle;
use crate::supervisor::TaskSupervisor;
use crate::types::ChainBalance;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WEI_PER_GWEI: Decimal = dec!(1000000000);

#[derive(Default)]
struct ConnectionState {
    backend: Option<Arc<dyn ChainBackend>>,
    endpoint: Option<String>,
    ws_connected: bool,
    last_block: u64,
    last_block_at: Option<DateTime<Utc>>,
}

/// Connectivity, balance reads and transaction submission for one chain.
pub struct ChainManager {
    name: String,
    config: ChainConfig,
    connector: Arc<dyn ChainConnector>,
    signer: Option<Arc<dyn TransactionSigner>>,
    price_oracle: Arc<PriceOracle>,
    state: Arc<RwLock<ConnectionState>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl ChainManager {
    pub fn new(
        name: impl Into<String>,
        config: ChainConfig,
        connector: Arc<dyn ChainConnector>,
        signer: Option<Arc<dyn TransactionSigner>>,
        price_oracle: Arc<PriceOracle>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            signer,
            price_oracle,
            state: Arc::new(RwLock::new(ConnectionState::default())),
            supervisor: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Connect to the first responsive RPC endpoint and start block tracking.
    #[instrument(skip(self, ctx), fields(chain = %self.name))]
    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), ChainError> {
        if !self.config.enabled {
            info!("Chain {} disabled, not starting", self.name);
            return Ok(());
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Chain manager for {} already running", self.name);
            return Ok(());
        }

        let (endpoint, backend, block) = self.connect_rpc().await?;
        let stream = self.connect_ws().await;
        let ws_connected = stream.is_some();

        {
            let mut state = self.state.write().await;
            state.backend = Some(backend.clone());
            state.endpoint = Some(endpoint.clone());
            state.ws_connected = ws_connected;
            state.last_block = block;
            state.last_block_at = Some(Utc::now());
        }

        let mut supervisor = TaskSupervisor::new(ctx);
        let token = supervisor.token();
        supervisor.spawn(
            "chain-block-monitor",
            monitor_blocks(
                self.name.clone(),
                backend,
                self.state.clone(),
                stream,
                self.config.block_poll_interval(),
                token,
            ),
        );
        *guard = Some(supervisor);

        info!(
            "Connected to {} via {} at block {} (websocket: {})",
            self.name, endpoint, block, ws_connected
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        let Some(supervisor) = supervisor else {
            return;
        };
        supervisor.shutdown().await;

        let mut state = self.state.write().await;
        state.backend = None;
        state.endpoint = None;
        state.ws_connected = false;
        info!("Chain manager for {} stopped", self.name);
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    async fn connect_rpc(&self) -> Result<(String, Arc<dyn ChainBackend>, u64), ChainError> {
        for endpoint in &self.config.rpc_endpoints {
            let attempt = async {
                let backend = self.connector.connect(&self.config, endpoint).await?;
                let block = backend.block_number().await?;
                Ok::<_, ChainError>((backend, block))
            };

            match timeout(CONNECT_TIMEOUT, attempt).await {
                Ok(Ok((backend, block))) => return Ok((endpoint.clone(), backend, block)),
                Ok(Err(e)) => warn!("RPC endpoint {} for {} failed: {}", endpoint, self.name, e),
                Err(_) => warn!("RPC endpoint {} for {} timed out", endpoint, self.name),
            }
        }

        Err(ChainError::AllEndpointsFailed {
            chain: self.name.clone(),
            attempts: self.config.rpc_endpoints.len(),
        })
    }

    async fn connect_ws(&self) -> Option<BoxStream<'static, u64>> {
        for endpoint in &self.config.ws_endpoints {
            match timeout(CONNECT_TIMEOUT, self.connector.subscribe_blocks(&self.config, endpoint)).await {
                Ok(Ok(stream)) => {
                    debug!("Subscribed to new blocks on {} via {}", self.name, endpoint);
                    return Some(stream);
                }
                Ok(Err(e)) => warn!("WebSocket endpoint {} for {} failed: {}", endpoint, self.name, e),
                Err(_) => warn!("WebSocket endpoint {} for {} timed out", endpoint, self.name),
            }
        }

        if !self.config.ws_endpoints.is_empty() {
            warn!("No WebSocket connection for {}, tracking blocks by polling", self.name);
        }
        None
    }

    async fn backend(&self) -> Result<Arc<dyn ChainBackend>, ChainError> {
        self.state
            .read()
            .await
            .backend
            .clone()
            .ok_or_else(|| ChainError::NotConnected(self.name.clone()))
    }

    /// Native and token balances of `address`, keyed by symbol.
    #[instrument(skip(self), fields(chain = %self.name))]
    pub async fn get_balances(&self, address: Address) -> Result<HashMap<String, ChainBalance>, ChainError> {
        let backend = self.backend().await?;
        let block = self.last_block().await;
        let mut balances = HashMap::new();

        let native = &self.config.native_token;
        let raw = backend.balance_at(address).await?;
        let amount = to_decimal_amount(raw, native.decimals)?;
        if is_reportable(native, amount) {
            let balance = self.chain_balance(native, amount, address, block).await;
            balances.insert(native.symbol.clone(), balance);
        }

        for token in self.config.enabled_tokens() {
            let Some(token_address) = token.address else {
                warn!("Token {} on {} has no contract address, skipping", token.symbol, self.name);
                continue;
            };

            let amount = match backend.token_balance_at(token_address, address).await {
                Ok(raw) => match to_decimal_amount(raw, token.decimals) {
                    Ok(amount) => amount,
                    Err(e) => {
                        warn!("Failed to convert {} balance on {}: {}", token.symbol, self.name, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Failed to get {} balance on {}: {}", token.symbol, self.name, e);
                    continue;
                }
            };

            if is_reportable(token, amount) {
                let balance = self.chain_balance(token, amount, address, block).await;
                balances.insert(token.symbol.clone(), balance);
            }
        }

        debug!("Found {} non-zero balances on {}", balances.len(), self.name);
        Ok(balances)
    }

    async fn chain_balance(&self, token: &TokenConfig, amount: Decimal, address: Address, block: u64) -> ChainBalance {
        let price = self.price_oracle.get_price(&token.coingecko_id).await;
        ChainBalance {
            chain: self.name.clone(),
            symbol: token.symbol.clone(),
            balance: amount,
            value_usd: amount * price,
            address,
            block_number: block,
            available: amount,
            pending: Decimal::ZERO,
            locked: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    /// Price, sign and broadcast a transaction. The result is always `Pending`.
    #[instrument(skip(self, request), fields(chain = %self.name, to = %request.to))]
    pub async fn send_transaction(&self, request: TransactionRequest) -> Result<TransactionResult, ChainError> {
        if request.to.is_zero() {
            return Err(ChainError::InvalidTransaction("recipient address is zero".to_string()));
        }
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| ChainError::SignerUnavailable(self.name.clone()))?;
        let backend = self.backend().await?;

        let gas_limit = match request.gas_limit {
            Some(limit) => limit,
            None => {
                let call = CallRequest {
                    from: request.from,
                    to: request.to,
                    value: request.value,
                    data: request.data.clone(),
                };
                backend.estimate_gas(&call).await?
            }
        };

        let suggested = backend.suggest_gas_price().await?;
        let gas_price = self.apply_gas_policy(suggested)?;

        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => backend.pending_nonce(request.from).await?,
        };

        let tx = UnsignedTransaction {
            chain_id: self.config.chain_id,
            from: request.from,
            to: request.to,
            value: request.value,
            data: request.data,
            nonce,
            gas_limit,
            gas_price,
        };

        let signed = signer.sign(&tx).await?;
        let hash = backend.send_raw_transaction(signed).await?;

        info!("Submitted transaction {} on {} (nonce {}, gas price {})", hash, self.name, nonce, gas_price);
        Ok(TransactionResult {
            hash,
            chain: self.name.clone(),
            status: TxStatus::Pending,
            nonce,
            gas_limit,
            gas_price,
            submitted_at: Utc::now(),
        })
    }

    /// Suggested price times the chain multiplier, clamped to the configured cap.
    pub fn apply_gas_policy(&self, suggested: u128) -> Result<u128, ChainError> {
        let suggested = Decimal::from_u128(suggested)
            .ok_or_else(|| ChainError::AmountConversion(format!("gas price {} out of range", suggested)))?;
        let mut price = suggested * self.config.gas_multiplier;

        if let Some(cap_gwei) = self.config.max_gas_price_gwei {
            let cap = cap_gwei * WEI_PER_GWEI;
            if price > cap {
                warn!("Gas price {} on {} exceeds cap {}, clamping", price, self.name, cap);
                price = cap;
            }
        }

        price
            .trunc()
            .to_u128()
            .ok_or_else(|| ChainError::AmountConversion(format!("gas price {} out of range", price)))
    }

    /// Raw suggested gas price in wei, without multiplier.
    pub async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        self.backend().await?.suggest_gas_price().await
    }

    pub async fn last_block(&self) -> u64 {
        self.state.read().await.last_block
    }

    pub async fn ws_connected(&self) -> bool {
        self.state.read().await.ws_connected
    }

    pub async fn status(&self) -> ChainHealth {
        let running = self.is_running().await;
        let state = self.state.read().await;
        ChainHealth {
            running,
            connected_endpoint: state.endpoint.clone(),
            ws_connected: state.ws_connected,
            last_block: state.last_block,
            last_block_at: state.last_block_at,
        }
    }
}

fn is_reportable(token: &TokenConfig, amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount >= token.min_balance
}

enum BlockEvent {
    Pushed(Option<u64>),
    Tick,
}

async fn next_block(stream: &mut Option<BoxStream<'static, u64>>) -> Option<u64> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn monitor_blocks(
    chain: String,
    backend: Arc<dyn ChainBackend>,
    state: Arc<RwLock<ConnectionState>>,
    mut stream: Option<BoxStream<'static, u64>>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The initial block was fetched while connecting.
    ticker.tick().await;

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            block = next_block(&mut stream) => BlockEvent::Pushed(block),
            _ = ticker.tick() => BlockEvent::Tick,
        };

        match event {
            BlockEvent::Pushed(Some(block)) => record_block(&state, block).await,
            BlockEvent::Pushed(None) => {
                warn!("Block subscription for {} ended, falling back to polling", chain);
                stream = None;
                state.write().await.ws_connected = false;
            }
            BlockEvent::Tick if stream.is_none() => match backend.block_number().await {
                Ok(block) => record_block(&state, block).await,
                Err(e) => warn!("Failed to get block number for {}: {}", chain, e),
            },
            BlockEvent::Tick => {}
        }
    }

    debug!("Block monitor for {} exited", chain);
}

async fn record_block(state: &RwLock<ConnectionState>, block: u64) {
    let mut state = state.write().await;
    if block >= state.last_block {
        state.last_block = block;
        state.last_block_at = Some(Utc::now());
    }
}
