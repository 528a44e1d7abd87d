pub mod local;

use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

pub use local::LocalWallet;

use crate::flow::Step;
use crate::repository::TxHandle;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    /// The account holder declined to sign.
    #[error("signature rejected: {0}")]
    Rejected(String),

    #[error("no wallet connected")]
    NotConnected,

    /// Signed, but the node refused the transaction.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// The account holder's signing device.
///
/// Holds the key and the account list; every write the flows make is signed and
/// broadcast through here. Implementations must tolerate being asked to sign while a
/// previous request is still in flight, but the flow engine never does that.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Currently connected accounts; empty when disconnected.
    fn accounts(&self) -> Vec<Address>;

    /// Receives the account list every time it changes.
    fn subscribe_accounts(&self) -> watch::Receiver<Vec<Address>>;

    /// Signs the step's call with the first connected account and broadcasts it.
    async fn sign_and_broadcast(&self, step: &Step) -> Result<TxHandle, WalletError>;

    /// Reconnects the configured account. Returns the connected accounts.
    async fn connect(&self) -> Result<Vec<Address>, WalletError>;

    /// Drops the account list. Subscribers observe an empty list.
    async fn disconnect(&self);
}

/// Stand-in used when no signing key is configured: no accounts, every write fails.
pub struct ReadOnlyWallet {
    accounts: watch::Sender<Vec<Address>>,
}

impl ReadOnlyWallet {
    pub fn new() -> Self {
        let (accounts, _) = watch::channel(Vec::new());
        Self { accounts }
    }
}

impl Default for ReadOnlyWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletAdapter for ReadOnlyWallet {
    fn accounts(&self) -> Vec<Address> {
        Vec::new()
    }

    fn subscribe_accounts(&self) -> watch::Receiver<Vec<Address>> {
        self.accounts.subscribe()
    }

    async fn sign_and_broadcast(&self, _step: &Step) -> Result<TxHandle, WalletError> {
        Err(WalletError::NotConnected)
    }

    async fn connect(&self) -> Result<Vec<Address>, WalletError> {
        Err(WalletError::NotConnected)
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_only_wallet_has_no_accounts() {
        let wallet = ReadOnlyWallet::new();

        assert!(wallet.accounts().is_empty());
        assert!(wallet.subscribe_accounts().borrow().is_empty());
        assert_eq!(wallet.connect().await, Err(WalletError::NotConnected));
    }
}
