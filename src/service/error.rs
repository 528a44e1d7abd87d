use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flow::FlowError;
use crate::repository::RepositoryError;

#[derive(Debug, Clone, Error, JsonSchema, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum ServiceError {
    // Request validation errors
    /// The request is malformed: bad amount, unknown token, identical tokens, unknown flow.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No wallet account is connected, so nothing can be signed.
    #[error("Wallet not connected")]
    WalletNotConnected,

    // Flow outcomes
    /// The contract registry cannot serve the request.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The account holder declined to sign a step.
    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    /// A step's transaction reverted or was dropped by the node.
    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    /// A step's confirmation did not arrive in time; the flow waits for a recheck.
    #[error("Confirmation timeout: {0}")]
    ConfirmationTimeout(String),

    /// The operation does not apply to the flow in its current state.
    #[error("Invalid flow state: {0}")]
    InvalidState(String),

    // Infrastructure errors (abstracted from repository layer)
    /// An error occurred while communicating with the blockchain.
    #[error("Blockchain connection error: {0}")]
    BlockchainError(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<FlowError> for ServiceError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Validation(msg) => ServiceError::InvalidRequest(msg),
            FlowError::WalletNotConnected => ServiceError::WalletNotConnected,
            FlowError::Configuration(msg) => ServiceError::ConfigurationError(msg),
            FlowError::SignatureRejected(msg) => ServiceError::SignatureRejected(msg),
            FlowError::Revert { reason } => ServiceError::TransactionReverted(reason),
            FlowError::Timeout(msg) => ServiceError::ConfirmationTimeout(msg),
            FlowError::InvalidState(msg) => ServiceError::InvalidState(msg),
            FlowError::Ledger(msg) => {
                ServiceError::BlockchainError(format!("Failed to interact with blockchain: {msg}"))
            }
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        ServiceError::from(FlowError::from(err))
    }
}
