pub mod dex;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use dex::DexService;
pub use error::ServiceError;
pub use types::*;

pub(crate) type ServiceResult<T> = std::result::Result<T, ServiceError>;
