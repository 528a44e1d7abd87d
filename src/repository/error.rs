use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract call error: {0}")]
    ContractError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    /// The receipt was not observed within the confirmation window.
    /// The transaction may still be included later.
    #[error("Confirmation timeout: {0}")]
    Timeout(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    /// The node no longer knows the transaction once the window elapsed.
    #[error("Transaction dropped: {0}")]
    Dropped(String),

    #[error("{0}")]
    Other(String),
}
