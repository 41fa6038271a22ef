#![allow(dead_code)]

use alloy_primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use multichain_wallet::bridges::{BridgeClient, BridgeError, BridgeQuote, BridgeRoute, BridgeTransfer, QuoteRequest};
use multichain_wallet::chain::{
    CallRequest, ChainBackend, ChainConnector, ChainError, TransactionSigner, UnsignedTransaction,
};
use multichain_wallet::config::{
    BridgeConfig, ChainConfig, GasConfig, LoggingConfig, MultichainConfig, PortfolioConfig, PriceOracleConfig,
    TokenConfig,
};
use multichain_wallet::gas::{GasPrice, GasPriceSource};
use multichain_wallet::oracle::{PriceSource, TokenPrice};
use multichain_wallet::{
    CrossChainTransferRequest, FeedError, MultichainManager, Collaborators, TransactionStatus, TransferStatus,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const WALLET: Address = address!("00000000000000000000000000000000000000aa");
pub const RECIPIENT: Address = address!("00000000000000000000000000000000000000bb");
pub const ETH_USDC: Address = address!("00000000000000000000000000000000000000e1");
pub const POLYGON_USDC: Address = address!("00000000000000000000000000000000000000e2");
pub const ARBITRUM_USDC: Address = address!("00000000000000000000000000000000000000e3");

/// Scale a human amount up to raw integer units.
pub fn raw(amount: Decimal, decimals: u32) -> U256 {
    let scaled = amount * Decimal::from(10u64.pow(decimals));
    U256::from(scaled.trunc().to_u128().unwrap())
}

pub struct MockBackend {
    pub native: Mutex<U256>,
    pub tokens: Mutex<HashMap<Address, U256>>,
    pub failing_tokens: Mutex<HashSet<Address>>,
    pub fail_native: AtomicBool,
    pub fail_block: AtomicBool,
    pub block: AtomicU64,
    pub gas_price: Mutex<u128>,
    pub gas_estimate: AtomicU64,
    pub nonce: AtomicU64,
    pub estimate_calls: AtomicUsize,
    pub sent: Mutex<Vec<Bytes>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            native: Mutex::new(U256::ZERO),
            tokens: Mutex::new(HashMap::new()),
            failing_tokens: Mutex::new(HashSet::new()),
            fail_native: AtomicBool::new(false),
            fail_block: AtomicBool::new(false),
            block: AtomicU64::new(100),
            gas_price: Mutex::new(20_000_000_000),
            gas_estimate: AtomicU64::new(21_000),
            nonce: AtomicU64::new(7),
            estimate_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    pub fn set_native(&self, amount: U256) {
        *self.native.lock().unwrap() = amount;
    }

    pub fn set_token(&self, token: Address, amount: U256) {
        self.tokens.lock().unwrap().insert(token, amount);
    }

    pub fn fail_token(&self, token: Address) {
        self.failing_tokens.lock().unwrap().insert(token);
    }

    pub fn set_gas_price(&self, wei: u128) {
        *self.gas_price.lock().unwrap() = wei;
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn balance_at(&self, _address: Address) -> Result<U256, ChainError> {
        if self.fail_native.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("balance unavailable".to_string()));
        }
        Ok(*self.native.lock().unwrap())
    }

    async fn token_balance_at(&self, token: Address, _owner: Address) -> Result<U256, ChainError> {
        if self.failing_tokens.lock().unwrap().contains(&token) {
            return Err(ChainError::Rpc(format!("call to {} reverted", token)));
        }
        Ok(self.tokens.lock().unwrap().get(&token).copied().unwrap_or(U256::ZERO))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        if self.fail_block.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("node unavailable".to_string()));
        }
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, ChainError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.gas_estimate.load(Ordering::SeqCst))
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> Result<B256, ChainError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(signed);
        Ok(B256::with_last_byte(sent.len() as u8))
    }
}

/// Maps endpoint URLs to mock backends. Unknown endpoints refuse connections.
#[derive(Default)]
pub struct MockConnector {
    pub backends: Mutex<HashMap<String, Arc<MockBackend>>>,
    pub block_feeds: Mutex<HashMap<String, mpsc::UnboundedReceiver<u64>>>,
    pub attempts: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn add_backend(&self, endpoint: &str, backend: Arc<MockBackend>) {
        self.backends.lock().unwrap().insert(endpoint.to_string(), backend);
    }

    /// Register a WebSocket endpoint and return the sender that pushes block heights.
    pub fn add_block_feed(&self, endpoint: &str) -> mpsc::UnboundedSender<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.block_feeds.lock().unwrap().insert(endpoint.to_string(), rx);
        tx
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self, chain: &ChainConfig, endpoint: &str) -> Result<Arc<dyn ChainBackend>, ChainError> {
        self.attempts.lock().unwrap().push(endpoint.to_string());
        let backend = self.backends.lock().unwrap().get(endpoint).cloned();
        match backend {
            Some(backend) => Ok(backend),
            None => Err(ChainError::Connection {
                chain: chain.name.clone(),
                reason: format!("connection refused: {}", endpoint),
            }),
        }
    }

    async fn subscribe_blocks(
        &self,
        chain: &ChainConfig,
        endpoint: &str,
    ) -> Result<BoxStream<'static, u64>, ChainError> {
        let feed = self.block_feeds.lock().unwrap().remove(endpoint);
        match feed {
            Some(rx) => {
                Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|block| (block, rx)) }).boxed())
            }
            None => Err(ChainError::Connection {
                chain: chain.name.clone(),
                reason: format!("websocket refused: {}", endpoint),
            }),
        }
    }
}

#[derive(Default)]
pub struct MockSigner {
    pub signed: Mutex<Vec<UnsignedTransaction>>,
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<Bytes, ChainError> {
        self.signed.lock().unwrap().push(tx.clone());
        Ok(Bytes::from(tx.nonce.to_be_bytes().to_vec()))
    }
}

#[derive(Default)]
pub struct StaticPriceSource {
    pub prices: Mutex<HashMap<String, (Decimal, Decimal)>>,
    pub fail: AtomicBool,
}

impl StaticPriceSource {
    pub fn with_defaults() -> Self {
        let source = Self::default();
        source.set("ethereum", dec!(2000), dec!(5));
        source.set("usd-coin", dec!(1), dec!(0));
        source.set("matic-network", dec!(0.5), dec!(-2));
        source
    }

    pub fn set(&self, id: &str, price: Decimal, change: Decimal) {
        self.prices.lock().unwrap().insert(id.to_string(), (price, change));
    }

    pub fn remove(&self, id: &str) {
        self.prices.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, TokenPrice>, FeedError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FeedError::InvalidResponse("price service down".to_string()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                prices.get(id).map(|(price, change)| {
                    (id.clone(), TokenPrice {
                        id: id.clone(),
                        price_usd: *price,
                        change_24h: *change,
                        last_updated: Utc::now(),
                    })
                })
            })
            .collect())
    }
}

#[derive(Default)]
pub struct StaticGasSource {
    pub base: Mutex<HashMap<String, u128>>,
}

impl StaticGasSource {
    pub fn set(&self, chain: &str, base: u128) {
        self.base.lock().unwrap().insert(chain.to_string(), base);
    }

    pub fn remove(&self, chain: &str) {
        self.base.lock().unwrap().remove(chain);
    }
}

#[async_trait]
impl GasPriceSource for StaticGasSource {
    async fn fetch_gas_price(&self, chain: &str) -> Result<GasPrice, FeedError> {
        let base = self.base.lock().unwrap().get(chain).copied();
        base.map(|base| GasPrice::from_base(chain, base))
            .ok_or_else(|| FeedError::UnknownKey(chain.to_string()))
    }
}

pub struct MockBridgeClient {
    pub name: String,
    pub routes: Mutex<Vec<BridgeRoute>>,
    pub fail_routes: AtomicBool,
    /// Seconds until expiry for each successive quote. Falls back to five minutes.
    pub quote_ttls: Mutex<VecDeque<i64>>,
    pub quotes_issued: AtomicUsize,
    pub executed: Mutex<Vec<BridgeQuote>>,
    pub statuses: Mutex<HashMap<String, TransactionStatus>>,
}

impl MockBridgeClient {
    pub fn new(name: &str, routes: Vec<BridgeRoute>) -> Self {
        Self {
            name: name.to_string(),
            routes: Mutex::new(routes),
            fail_routes: AtomicBool::new(false),
            quote_ttls: Mutex::new(VecDeque::new()),
            quotes_issued: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_quote_ttl(&self, seconds: i64) {
        self.quote_ttls.lock().unwrap().push_back(seconds);
    }

    pub fn set_status(&self, transfer_id: &str, status: TransferStatus, dest_tx_hash: Option<&str>) {
        self.statuses.lock().unwrap().insert(transfer_id.to_string(), TransactionStatus {
            status,
            dest_tx_hash: dest_tx_hash.map(str::to_string),
            updated_at: Utc::now(),
        });
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl BridgeClient for MockBridgeClient {
    fn protocol(&self) -> &str {
        &self.name
    }

    async fn get_supported_routes(&self) -> Result<Vec<BridgeRoute>, BridgeError> {
        if self.fail_routes.load(Ordering::SeqCst) {
            return Err(BridgeError::QuoteFailed("route api unavailable".to_string()));
        }
        Ok(self.routes.lock().unwrap().clone())
    }

    async fn get_quote(&self, request: &QuoteRequest) -> Result<BridgeQuote, BridgeError> {
        let number = self.quotes_issued.fetch_add(1, Ordering::SeqCst) + 1;
        let ttl = self.quote_ttls.lock().unwrap().pop_front().unwrap_or(300);
        let fee = request.amount * request.route.fee / Decimal::ONE_HUNDRED;
        let now = Utc::now();

        Ok(BridgeQuote {
            id: format!("{}-quote-{}", self.name, number),
            protocol: self.name.clone(),
            route: request.route.clone(),
            amount_in: request.amount,
            amount_out: request.amount - fee,
            fee,
            estimated_time: request.route.estimated_time,
            expires_at: now + Duration::seconds(ttl),
            created_at: now,
        })
    }

    async fn execute_transfer(
        &self,
        quote: &BridgeQuote,
        _request: &CrossChainTransferRequest,
    ) -> Result<BridgeTransfer, BridgeError> {
        let mut executed = self.executed.lock().unwrap();
        executed.push(quote.clone());
        Ok(BridgeTransfer {
            transfer_id: format!("{}-transfer-{}", self.name, executed.len()),
            source_tx_hash: format!("0xsource{}", executed.len()),
        })
    }

    async fn get_transaction_status(&self, transfer_id: &str) -> Result<TransactionStatus, BridgeError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(transfer_id)
            .cloned()
            .unwrap_or(TransactionStatus {
                status: TransferStatus::InProgress,
                dest_tx_hash: None,
                updated_at: Utc::now(),
            }))
    }
}

pub fn route(
    protocol: &str,
    source: &str,
    dest: &str,
    token: &str,
    fee: Decimal,
    minutes: u64,
    success_rate: f64,
) -> BridgeRoute {
    BridgeRoute {
        id: format!("{}:{}:{}:{}", protocol, source, dest, token),
        protocol: protocol.to_string(),
        source_chain: source.to_string(),
        dest_chain: dest.to_string(),
        token: token.to_string(),
        min_amount: dec!(10),
        max_amount: dec!(100000),
        fee,
        estimated_time: minutes * 60,
        liquidity: dec!(1000000),
        success_rate,
        enabled: true,
    }
}

pub fn transfer_request(source: &str, dest: &str, token: &str, amount: Decimal) -> CrossChainTransferRequest {
    CrossChainTransferRequest {
        source_chain: source.to_string(),
        dest_chain: dest.to_string(),
        token: token.to_string(),
        amount,
        from_address: WALLET,
        to_address: RECIPIENT,
        slippage: dec!(0.005),
        deadline: None,
    }
}

fn usdc(address: Address) -> TokenConfig {
    TokenConfig::erc20(address, "USDC", "USD Coin", 6, "usd-coin", true)
}

pub fn chain_config(name: &str, chain_id: u64, native: TokenConfig, usdc_address: Address) -> ChainConfig {
    ChainConfig {
        chain_id,
        name: name.to_string(),
        rpc_endpoints: vec![format!("mock://{}/primary", name), format!("mock://{}/backup", name)],
        ws_endpoints: vec![],
        explorer_url: String::new(),
        native_token: native,
        tokens: vec![usdc(usdc_address)],
        gas_multiplier: dec!(1.1),
        max_gas_price_gwei: None,
        confirmation_blocks: 1,
        block_poll_interval_seconds: 1,
        enabled: true,
        priority: 1,
    }
}

/// Three chains with one-second intervals everywhere.
pub fn test_config() -> MultichainConfig {
    let mut chain_configs = HashMap::new();
    chain_configs.insert(
        "ethereum".to_string(),
        chain_config("ethereum", 1, TokenConfig::native("ETH", "Ether", "ethereum"), ETH_USDC),
    );
    chain_configs.insert(
        "polygon".to_string(),
        chain_config("polygon", 137, TokenConfig::native("MATIC", "Polygon", "matic-network"), POLYGON_USDC),
    );
    chain_configs.insert(
        "arbitrum".to_string(),
        chain_config("arbitrum", 42161, TokenConfig::native("ETH", "Ether", "ethereum"), ARBITRUM_USDC),
    );

    MultichainConfig {
        enabled: true,
        supported_chains: vec!["ethereum".to_string(), "polygon".to_string(), "arbitrum".to_string()],
        default_chain: "ethereum".to_string(),
        update_interval_seconds: 1,
        balance_threshold: dec!(0.000001),
        chain_configs,
        bridge_config: BridgeConfig::default(),
        gas_config: GasConfig {
            enabled: true,
            update_interval_seconds: 1,
        },
        price_oracle_config: PriceOracleConfig {
            update_interval_seconds: 1,
            ..PriceOracleConfig::default()
        },
        portfolio_config: PortfolioConfig {
            enabled: true,
            update_interval_seconds: 1,
            history_retention_hours: 24,
            max_snapshots_per_address: None,
        },
        logging: LoggingConfig::default(),
    }
}

/// Mock collaborators wired to `test_config` endpoints.
pub struct Harness {
    pub connector: Arc<MockConnector>,
    pub backends: HashMap<String, Arc<MockBackend>>,
    pub prices: Arc<StaticPriceSource>,
    pub signer: Arc<MockSigner>,
}

impl Harness {
    pub fn new() -> Self {
        let connector = Arc::new(MockConnector::default());
        let mut backends = HashMap::new();
        for chain in ["ethereum", "polygon", "arbitrum"] {
            let backend = Arc::new(MockBackend::default());
            connector.add_backend(&format!("mock://{}/primary", chain), backend.clone());
            backends.insert(chain.to_string(), backend);
        }

        Self {
            connector,
            backends,
            prices: Arc::new(StaticPriceSource::with_defaults()),
            signer: Arc::new(MockSigner::default()),
        }
    }

    pub fn backend(&self, chain: &str) -> Arc<MockBackend> {
        self.backends[chain].clone()
    }

    /// ethereum: 3.5 ETH + 8000 USDC, polygon: 4000 USDC, arbitrum: 1.75 ETH.
    pub fn seed_reference_balances(&self) {
        let ethereum = self.backend("ethereum");
        ethereum.set_native(raw(dec!(3.5), 18));
        ethereum.set_token(ETH_USDC, raw(dec!(8000), 6));

        self.backend("polygon").set_token(POLYGON_USDC, raw(dec!(4000), 6));
        self.backend("arbitrum").set_native(raw(dec!(1.75), 18));
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.connector.clone(), self.prices.clone()).with_signer(self.signer.clone())
    }

    pub fn manager(&self, config: MultichainConfig, clients: Vec<Arc<MockBridgeClient>>) -> MultichainManager {
        let mut collaborators = self.collaborators();
        for client in clients {
            collaborators = collaborators.with_bridge_client(client);
        }
        MultichainManager::new(config, collaborators).unwrap()
    }
}
