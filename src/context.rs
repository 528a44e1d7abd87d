use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy::providers::ProviderBuilder;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FlowConfig};
use crate::flow::{BalanceTracker, QuoteRefresher};
use crate::registry::ContractRegistry;
use crate::repository::{AlloyLedgerRepository, LedgerRepository};
use crate::wallet::{LocalWallet, ReadOnlyWallet, WalletAdapter};

/// Process-wide state shared by the flow engine and the tool service.
pub struct AppContext {
    registry: Arc<ContractRegistry>,
    wallet: Arc<dyn WalletAdapter>,
    ledger: Arc<dyn LedgerRepository>,
    settings: FlowConfig,
    /// One permit: at most one signature request is outstanding at a time.
    signer: Arc<Semaphore>,
    /// Number of flows that completed; bumped once per completion.
    epoch: watch::Sender<u64>,
    session: Mutex<CancellationToken>,
    quotes: QuoteRefresher,
    balances: BalanceTracker,
}

impl AppContext {
    pub fn new(
        registry: Arc<ContractRegistry>,
        wallet: Arc<dyn WalletAdapter>,
        ledger: Arc<dyn LedgerRepository>,
        settings: FlowConfig,
    ) -> Arc<Self> {
        let (epoch, epoch_rx) = watch::channel(0);
        let quotes = QuoteRefresher::new(ledger.clone(), registry.router().address);
        let balances = BalanceTracker::new(ledger.clone(), registry.clone(), epoch_rx);

        Arc::new(Self {
            registry,
            wallet,
            ledger,
            settings,
            signer: Arc::new(Semaphore::new(1)),
            epoch,
            session: Mutex::new(CancellationToken::new()),
            quotes,
            balances,
        })
    }

    /// Loads the contract registry, connects the RPC endpoint and the wallet.
    ///
    /// Without a configured private key the context runs read-only: every flow fails
    /// validation because no account is connected.
    pub fn initialize(config: &Config) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(ContractRegistry::load(&config.contracts)?);

        let rpc_url = &config.rpc.url;
        let provider = ProviderBuilder::new().connect_http(rpc_url.parse()?);
        let ledger = AlloyLedgerRepository::new(
            Arc::new(provider),
            Duration::from_secs(config.flow.confirmation_timeout_secs),
            Duration::from_millis(config.flow.poll_interval_ms),
        );

        let wallet: Arc<dyn WalletAdapter> = if !config.wallet.private_key.is_empty() {
            match LocalWallet::connect(rpc_url, &config.wallet.private_key) {
                Ok(wallet) => {
                    tracing::info!("Initialized with wallet address: {}", wallet.address());
                    Arc::new(wallet)
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize wallet: {e}. Using read-only mode.");
                    Arc::new(ReadOnlyWallet::new())
                }
            }
        } else {
            tracing::info!("No private key provided. Running in read-only mode.");
            Arc::new(ReadOnlyWallet::new())
        };

        Ok(Self::new(
            registry,
            wallet,
            Arc::new(ledger),
            config.flow.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    pub fn wallet(&self) -> &Arc<dyn WalletAdapter> {
        &self.wallet
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerRepository> {
        &self.ledger
    }

    pub fn settings(&self) -> &FlowConfig {
        &self.settings
    }

    pub(crate) fn signer(&self) -> &Arc<Semaphore> {
        &self.signer
    }

    pub fn quotes(&self) -> &QuoteRefresher {
        &self.quotes
    }

    pub fn balances(&self) -> &BalanceTracker {
        &self.balances
    }

    pub fn completed_flows(&self) -> u64 {
        *self.epoch.borrow()
    }

    pub fn subscribe_completions(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    pub(crate) fn mark_flow_completed(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Token every flow started in the current wallet session derives its own from.
    pub fn session_token(&self) -> CancellationToken {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ends the wallet session: flows that have not broadcast yet are cancelled, the
    /// quote and the balance snapshot are dropped.
    pub fn reset(&self) {
        let previous = std::mem::replace(
            &mut *self.session.lock().unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();

        self.quotes.clear();
        self.balances.invalidate();
        tracing::info!("Session reset");
    }
}
