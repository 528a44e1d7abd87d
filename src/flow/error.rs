use thiserror::Error;

use crate::registry::RegistryError;
use crate::repository::RepositoryError;
use crate::wallet::WalletError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    /// Caller input rejected before any step ran.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Validation failure: no wallet account to sign with.
    #[error("validation failed: no wallet connected")]
    WalletNotConnected,

    /// The contract registry cannot serve the request.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    /// The transaction was mined and reverted, or the node dropped it.
    #[error("transaction reverted: {reason}")]
    Revert { reason: String },

    #[error("confirmation timed out: {0}")]
    Timeout(String),

    /// The operation does not apply to the flow's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl FlowError {
    /// True for every failure raised before a flow exists.
    pub fn is_validation(&self) -> bool {
        matches!(self, FlowError::Validation(_) | FlowError::WalletNotConnected)
    }
}

impl From<RepositoryError> for FlowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Timeout(msg) => FlowError::Timeout(msg),
            RepositoryError::Reverted(reason) | RepositoryError::Dropped(reason) => {
                FlowError::Revert { reason }
            }
            RepositoryError::RpcError(msg)
            | RepositoryError::ContractError(msg)
            | RepositoryError::NetworkError(msg)
            | RepositoryError::ParseError(msg)
            | RepositoryError::Other(msg) => FlowError::Ledger(msg),
        }
    }
}

impl From<RegistryError> for FlowError {
    fn from(err: RegistryError) -> Self {
        FlowError::Configuration(err.to_string())
    }
}

impl From<WalletError> for FlowError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Rejected(reason) => FlowError::SignatureRejected(reason),
            WalletError::NotConnected => FlowError::WalletNotConnected,
            WalletError::Broadcast(msg) => FlowError::Ledger(msg),
        }
    }
}
