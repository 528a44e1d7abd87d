use std::str::FromStr;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::instrument;

use super::{WalletAdapter, WalletError};
use crate::flow::Step;
use crate::repository::TxHandle;

/// EIP-1193 code for "user rejected the request".
const USER_REJECTED: i64 = 4001;

/// Wallet backed by a local private key, signing through an alloy wallet filler.
pub struct LocalWallet {
    provider: DynProvider,
    address: Address,
    accounts: watch::Sender<Vec<Address>>,
}

impl LocalWallet {
    /// Builds the signing provider. Fails on a malformed key or RPC URL; nothing is
    /// sent to the node here.
    pub fn connect(rpc_url: &str, private_key: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| anyhow::anyhow!("Invalid private key: {e}"))?;
        let address = signer.address();

        let url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid RPC URL {rpc_url}: {e}"))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        let (accounts, _) = watch::channel(vec![address]);

        Ok(Self {
            provider,
            address,
            accounts,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl WalletAdapter for LocalWallet {
    fn accounts(&self) -> Vec<Address> {
        self.accounts.borrow().clone()
    }

    fn subscribe_accounts(&self) -> watch::Receiver<Vec<Address>> {
        self.accounts.subscribe()
    }

    #[instrument(skip(self, step), fields(step = step.index, kind = ?step.kind), err)]
    async fn sign_and_broadcast(&self, step: &Step) -> Result<TxHandle, WalletError> {
        let from = self
            .accounts
            .borrow()
            .first()
            .copied()
            .ok_or(WalletError::NotConnected)?;

        let mut tx = TransactionRequest::default()
            .with_from(from)
            .with_to(step.target)
            .with_input(step.call.calldata());
        if let Some(value) = step.value {
            tx = tx.with_value(value);
        }

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(classify_send_error)?;

        let hash = *pending.tx_hash();
        tracing::info!("Broadcast step {} as {}", step.index, hash);

        Ok(TxHandle { hash, from })
    }

    async fn connect(&self) -> Result<Vec<Address>, WalletError> {
        self.accounts.send_replace(vec![self.address]);
        tracing::info!("Wallet connected: {}", self.address);
        Ok(vec![self.address])
    }

    async fn disconnect(&self) {
        self.accounts.send_replace(Vec::new());
        tracing::info!("Wallet disconnected");
    }
}

fn classify_send_error(err: TransportError) -> WalletError {
    if let Some(payload) = err.as_error_resp() {
        let message = payload.message.to_lowercase();
        if payload.code == USER_REJECTED
            || message.contains("rejected")
            || message.contains("denied")
        {
            return WalletError::Rejected(payload.message.to_string());
        }
    }

    WalletError::Broadcast(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::RpcError;

    // Anvil's first default account
    const TEST_PRIVATE_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[tokio::test]
    async fn test_connect_with_valid_key() {
        let wallet = LocalWallet::connect("http://localhost:8545", TEST_PRIVATE_KEY).unwrap();

        let expected = Address::from_str(TEST_ADDRESS).unwrap();
        assert_eq!(wallet.address(), expected);
        assert_eq!(wallet.accounts(), vec![expected]);
    }

    #[tokio::test]
    async fn test_connect_with_invalid_key() {
        let result = LocalWallet::connect("http://localhost:8545", "not-a-key");
        let err = result.err().expect("invalid key should be refused");
        assert!(err.to_string().contains("Invalid private key"), "{err}");
    }

    #[tokio::test]
    async fn test_connect_with_invalid_rpc_url() {
        let result = LocalWallet::connect("not a url", TEST_PRIVATE_KEY);
        let err = result.err().expect("invalid URL should be refused");
        assert!(err.to_string().contains("Invalid RPC URL"), "{err}");
    }

    #[tokio::test]
    async fn test_disconnect_notifies_subscribers() {
        let wallet = LocalWallet::connect("http://localhost:8545", TEST_PRIVATE_KEY).unwrap();
        let mut rx = wallet.subscribe_accounts();

        wallet.disconnect().await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
        assert!(wallet.accounts().is_empty());

        let accounts = wallet.connect().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), accounts);
    }

    #[test]
    fn test_classify_user_rejection() {
        let payload = ErrorPayload {
            code: USER_REJECTED,
            message: "User denied transaction signature".into(),
            data: None,
        };
        let err: TransportError = RpcError::ErrorResp(payload);
        assert!(matches!(classify_send_error(err), WalletError::Rejected(_)));

        let payload = ErrorPayload {
            code: -32000,
            message: "insufficient funds for gas".into(),
            data: None,
        };
        let err: TransportError = RpcError::ErrorResp(payload);
        assert!(matches!(classify_send_error(err), WalletError::Broadcast(_)));
    }
}
