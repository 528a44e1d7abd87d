pub mod alloy;
pub mod contract;
pub mod error;

use ::alloy::primitives::{Address, B256, U256};
pub use alloy::AlloyLedgerRepository;
use async_trait::async_trait;
pub use error::RepositoryError;

pub(crate) type RepoResult<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub balance: U256,
    pub decimals: u8,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
}

/// Reserves of a Uniswap V2 pair, ordered to match the tokens the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReserves {
    pub pair: Address,
    pub reserve_a: U256,
    pub reserve_b: U256,
}

/// Opaque reference to a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle {
    pub hash: B256,
    pub from: Address,
}

/// Inclusion proof for a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Read access to the ledger plus confirmation tracking for broadcast transactions.
///
/// Writes go through the [`WalletAdapter`](crate::wallet::WalletAdapter), which owns the
/// signing key; this trait only observes their outcome.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Native coin balance of `address`, in the chain's smallest unit.
    async fn native_balance(&self, address: Address) -> RepoResult<U256>;

    /// ERC20 balance of `owner` together with the token's decimals and symbol.
    async fn erc20_balance(&self, token: Address, owner: Address) -> RepoResult<TokenBalance>;

    async fn token_metadata(&self, token: Address) -> RepoResult<TokenMetadata>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address)
    -> RepoResult<U256>;

    /// Factory `getPair`; `None` when no pair has been created for the tokens.
    async fn pair_address(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> RepoResult<Option<Address>>;

    /// Looks up the pair through `factory` and reads its reserves.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The factory has no pair for these tokens
    /// * `Ok(Some(PairReserves))` - Reserves ordered as `(token_a, token_b)`
    /// * `Err(RepositoryError)` - If any contract call fails
    async fn pair_reserves(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> RepoResult<Option<PairReserves>>;

    /// Router `getAmountsOut`; the last element is the output of the full path.
    async fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> RepoResult<Vec<U256>>;

    /// Waits for the receipt of `handle` within the configured confirmation window.
    ///
    /// # Returns
    ///
    /// * `Ok(Receipt)` - The transaction was included and succeeded
    /// * `Err(RepositoryError::Reverted)` - The transaction was included but reverted
    /// * `Err(RepositoryError::Timeout)` - No receipt yet; the transaction is still known
    /// * `Err(RepositoryError::Dropped)` - No receipt and the node no longer knows the transaction
    async fn wait_for_confirmation(&self, handle: &TxHandle) -> RepoResult<Receipt>;
}
