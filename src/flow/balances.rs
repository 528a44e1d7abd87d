use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::instrument;

use super::FlowResult;
use crate::registry::ContractRegistry;
use crate::repository::LedgerRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceView {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub balance: U256,
    /// What the router may currently pull from the account.
    pub router_allowance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolView {
    pub token_a: String,
    pub token_b: String,
    /// `None` until the first liquidity deposit creates the pair.
    pub pair: Option<Address>,
    pub reserve_a: U256,
    pub reserve_b: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub account: Address,
    /// Completed-flow epoch observed before the reads started.
    pub epoch: u64,
    pub native: U256,
    pub tokens: Vec<TokenBalanceView>,
    pub pools: Vec<PoolView>,
    pub read_at: DateTime<Utc>,
}

/// Balance and reserve display state.
///
/// A snapshot is only served while no flow has completed since it was read and it
/// belongs to the account asking; anything else forces a refresh.
pub struct BalanceTracker {
    ledger: Arc<dyn LedgerRepository>,
    registry: Arc<ContractRegistry>,
    epoch: watch::Receiver<u64>,
    snapshot: Mutex<Option<BalanceSnapshot>>,
}

impl BalanceTracker {
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        registry: Arc<ContractRegistry>,
        epoch: watch::Receiver<u64>,
    ) -> Self {
        Self {
            ledger,
            registry,
            epoch,
            snapshot: Mutex::new(None),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn refresh(&self, account: Address) -> FlowResult<BalanceSnapshot> {
        let epoch = *self.epoch.borrow();
        let router = self.registry.router().address;
        let factory = self.registry.factory().address;

        let native = self.ledger.native_balance(account).await?;

        let mut tokens = Vec::new();
        for token in self.registry.tokens() {
            let balance = self.ledger.erc20_balance(token.address, account).await?;
            let router_allowance = self.ledger.allowance(token.address, account, router).await?;
            tokens.push(TokenBalanceView {
                symbol: token.symbol.clone(),
                address: token.address,
                decimals: token.decimals,
                balance: balance.balance,
                router_allowance,
            });
        }

        let mut pools = Vec::new();
        for (a, b) in self.registry.pools() {
            // Pool symbols were checked when the registry was built
            let (Some(token_a), Some(token_b)) = (self.registry.token(a), self.registry.token(b))
            else {
                continue;
            };

            let reserves = self
                .ledger
                .pair_reserves(factory, token_a.address, token_b.address)
                .await?;
            pools.push(PoolView {
                token_a: a.clone(),
                token_b: b.clone(),
                pair: reserves.as_ref().map(|r| r.pair),
                reserve_a: reserves.as_ref().map_or(U256::ZERO, |r| r.reserve_a),
                reserve_b: reserves.as_ref().map_or(U256::ZERO, |r| r.reserve_b),
            });
        }

        let snapshot = BalanceSnapshot {
            account,
            epoch,
            native,
            tokens,
            pools,
            read_at: Utc::now(),
        };

        tracing::debug!("Balances refreshed for {} at epoch {}", account, epoch);
        *self.lock() = Some(snapshot.clone());

        Ok(snapshot)
    }

    /// The cached snapshot, if it is still current for `account`.
    pub fn view(&self, account: Address) -> Option<BalanceSnapshot> {
        let current_epoch = *self.epoch.borrow();
        self.lock()
            .as_ref()
            .filter(|s| s.account == account && s.epoch == current_epoch)
            .cloned()
    }

    pub fn invalidate(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BalanceSnapshot>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
