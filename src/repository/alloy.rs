use std::sync::Arc;
use std::time::Duration;

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use tracing::instrument;

use super::error::RepositoryError;
use crate::repository::contract::{IERC20, IUniswapV2Factory, IUniswapV2Pair, IUniswapV2Router02};
use crate::repository::{
    LedgerRepository, PairReserves, Receipt, RepoResult, TokenBalance, TokenMetadata, TxHandle,
};

pub struct AlloyLedgerRepository<P> {
    provider: Arc<P>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl<P: Provider + Clone + 'static> AlloyLedgerRepository<P> {
    pub fn new(provider: Arc<P>, confirmation_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            provider,
            confirmation_timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> LedgerRepository for AlloyLedgerRepository<P> {
    #[instrument(skip(self), err)]
    async fn native_balance(&self, address: Address) -> RepoResult<U256> {
        self.provider.get_balance(address).await.map_err(|e| {
            if e.to_string().contains("429") {
                tracing::warn!("Rate limited while getting native balance for {}", address);
            }
            RepositoryError::RpcError(e.to_string())
        })
    }

    #[instrument(skip(self), err)]
    async fn erc20_balance(&self, token: Address, owner: Address) -> RepoResult<TokenBalance> {
        let contract = IERC20::new(token, self.provider.clone());

        let balance = contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| RepositoryError::ContractError(e.to_string()))?;

        let TokenMetadata { decimals, symbol } = self.token_metadata(token).await?;

        Ok(TokenBalance {
            balance,
            decimals,
            symbol,
        })
    }

    #[instrument(skip(self), err)]
    async fn token_metadata(&self, token: Address) -> RepoResult<TokenMetadata> {
        let contract = IERC20::new(token, self.provider.clone());

        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| RepositoryError::ContractError(e.to_string()))?;

        let symbol = contract
            .symbol()
            .call()
            .await
            .map_err(|e| RepositoryError::ContractError(e.to_string()))?;

        Ok(TokenMetadata { decimals, symbol })
    }

    #[instrument(skip(self), err)]
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> RepoResult<U256> {
        IERC20::new(token, self.provider.clone())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| RepositoryError::ContractError(e.to_string()))
    }

    #[instrument(skip(self), err)]
    async fn pair_address(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> RepoResult<Option<Address>> {
        let factory = IUniswapV2Factory::new(factory, self.provider.clone());

        let pair_address = factory
            .getPair(token_a, token_b)
            .call()
            .await
            .map_err(|e| RepositoryError::ContractError(format!("Failed to get pair: {}", e)))?;

        if pair_address == Address::ZERO {
            tracing::debug!("No pair deployed for {} / {}", token_a, token_b);
            return Ok(None);
        }

        Ok(Some(pair_address))
    }

    #[instrument(skip(self), err)]
    async fn pair_reserves(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> RepoResult<Option<PairReserves>> {
        let Some(pair_address) = self.pair_address(factory, token_a, token_b).await? else {
            return Ok(None);
        };

        let pair = IUniswapV2Pair::new(pair_address, self.provider.clone());

        let reserves = pair.getReserves().call().await.map_err(|e| {
            RepositoryError::ContractError(format!("Failed to get reserves: {}", e))
        })?;

        let token0 =
            pair.token0().call().await.map_err(|e| {
                RepositoryError::ContractError(format!("Failed to get token0: {}", e))
            })?;

        let reserve0 = U256::from(reserves.reserve0);
        let reserve1 = U256::from(reserves.reserve1);

        // Pair storage is sorted by address; hand back reserves in caller order
        let (reserve_a, reserve_b) = if token0 == token_a {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };

        Ok(Some(PairReserves {
            pair: pair_address,
            reserve_a,
            reserve_b,
        }))
    }

    #[instrument(skip(self), err)]
    async fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> RepoResult<Vec<U256>> {
        let router = IUniswapV2Router02::new(router, self.provider.clone());

        let amounts = router
            .getAmountsOut(amount_in, path.clone())
            .call()
            .await
            .map_err(|e| {
                tracing::error!("Failed to get amounts out for path {:?}: {}", path, e);
                RepositoryError::ContractError(format!("Failed to get amounts out: {}", e))
            })?;

        tracing::debug!("Swap amounts result: {:?}", amounts);
        Ok(amounts.to_vec())
    }

    #[instrument(skip(self), fields(hash = %handle.hash), err)]
    async fn wait_for_confirmation(&self, handle: &TxHandle) -> RepoResult<Receipt> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            match self.provider.get_transaction_receipt(handle.hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.status() {
                        return Err(RepositoryError::Reverted(format!(
                            "transaction {} reverted in block {}",
                            handle.hash,
                            receipt
                                .block_number
                                .map(|n| n.to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        )));
                    }

                    return Ok(Receipt {
                        hash: receipt.transaction_hash,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    });
                }
                Ok(None) => {}
                // A failed poll says nothing about the transaction itself
                Err(e) => tracing::warn!("Receipt poll for {} failed: {}", handle.hash, e),
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        match self.provider.get_transaction_by_hash(handle.hash).await {
            Ok(None) => Err(RepositoryError::Dropped(format!(
                "transaction {} is unknown to the node",
                handle.hash
            ))),
            Ok(Some(_)) => Err(RepositoryError::Timeout(format!(
                "no receipt for {} after {:?}",
                handle.hash, self.confirmation_timeout
            ))),
            Err(e) => Err(RepositoryError::Timeout(format!(
                "no receipt for {} after {:?} ({})",
                handle.hash, self.confirmation_timeout, e
            ))),
        }
    }
}
