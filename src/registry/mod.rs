//! Registry of the deployed contracts the flows are allowed to call.
//!
//! Built once at start-up from the deployment artifact plus token metadata from the
//! configuration. Every address must be distinct: two logical contracts resolving to
//! the same address is a configuration error, never a shortcut.

pub mod deployments;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use alloy::primitives::Address;
use alloy::sol_types::SolCall;
use thiserror::Error;

pub use deployments::Deployments;

use crate::config::{ContractsConfig, TokenConfig};
use crate::repository::contract::{IERC20, IUniswapV2Factory, IUniswapV2Router02, IWBTC};

/// Deployment artifact key of the Uniswap V2 factory.
pub const FACTORY: &str = "UniswapV2Factory";

/// Deployment artifact key of the Uniswap V2 router.
pub const ROUTER: &str = "UniswapV2Router02";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("missing contract entry: {0}")]
    MissingEntry(String),

    #[error("{first} and {second} share address {address}")]
    DuplicateAddress {
        first: String,
        second: String,
        address: Address,
    },

    #[error("{0} is configured with the zero address")]
    ZeroAddress(String),

    #[error("token {0} is configured more than once")]
    DuplicateToken(String),

    #[error("pool {0}/{1} references an unknown token")]
    UnknownPoolToken(String, String),

    #[error("contract {contract} does not expose {signature}")]
    UnsupportedFunction {
        contract: String,
        signature: &'static str,
    },

    #[error("no registered contract at {0}")]
    UnknownContract(Address),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Parse(String),
}

/// One callable function, identified by its canonical signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub signature: &'static str,
    pub selector: [u8; 4],
}

impl FunctionSpec {
    pub fn of<C: SolCall>() -> Self {
        Self {
            signature: C::SIGNATURE,
            selector: C::SELECTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEntry {
    pub name: String,
    pub address: Address,
    pub functions: Vec<FunctionSpec>,
}

impl ContractEntry {
    pub fn supports(&self, selector: [u8; 4]) -> bool {
        self.functions.iter().any(|f| f.selector == selector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub name: String,
    pub address: Address,
    pub decimals: u8,
    pub wrapped: bool,
}

#[derive(Debug, Clone)]
pub struct ContractRegistry {
    router: ContractEntry,
    factory: ContractEntry,
    tokens: BTreeMap<String, TokenInfo>,
    contracts: HashMap<Address, ContractEntry>,
    pools: Vec<(String, String)>,
}

impl ContractRegistry {
    /// Reads the deployment artifact named in the configuration and builds the registry.
    pub fn load(config: &ContractsConfig) -> Result<Self, RegistryError> {
        let deployments = Deployments::load(&config.deployments)?;
        let registry = Self::build(&deployments, &config.tokens, &config.pools)?;

        tracing::info!(
            "Loaded contract registry: router={}, factory={}, tokens=[{}]",
            registry.router.address,
            registry.factory.address,
            registry.supported_tokens().join(", ")
        );

        Ok(registry)
    }

    pub fn build(
        deployments: &Deployments,
        tokens: &[TokenConfig],
        pools: &[[String; 2]],
    ) -> Result<Self, RegistryError> {
        let router = ContractEntry {
            name: ROUTER.to_string(),
            address: required(deployments, ROUTER)?,
            functions: vec![
                FunctionSpec::of::<IUniswapV2Router02::getAmountsOutCall>(),
                FunctionSpec::of::<IUniswapV2Router02::swapExactTokensForTokensCall>(),
                FunctionSpec::of::<IUniswapV2Router02::addLiquidityCall>(),
            ],
        };

        let factory = ContractEntry {
            name: FACTORY.to_string(),
            address: required(deployments, FACTORY)?,
            functions: vec![FunctionSpec::of::<IUniswapV2Factory::getPairCall>()],
        };

        let mut token_map = BTreeMap::new();
        let mut entries = vec![router.clone(), factory.clone()];

        for token in tokens {
            let symbol = token.symbol.to_uppercase();
            if token_map.contains_key(&symbol) {
                return Err(RegistryError::DuplicateToken(symbol));
            }

            let address = match &token.address {
                Some(address) => Address::from_str(address).map_err(|e| {
                    RegistryError::Parse(format!("invalid address for {symbol}: {e}"))
                })?,
                None => required(deployments, &token.symbol)?,
            };
            if address == Address::ZERO {
                return Err(RegistryError::ZeroAddress(symbol));
            }

            let mut functions = vec![
                FunctionSpec::of::<IERC20::balanceOfCall>(),
                FunctionSpec::of::<IERC20::allowanceCall>(),
                FunctionSpec::of::<IERC20::approveCall>(),
            ];
            if token.wrapped {
                functions.push(FunctionSpec::of::<IWBTC::depositCall>());
            } else {
                functions.push(FunctionSpec::of::<IERC20::mintCall>());
            }

            entries.push(ContractEntry {
                name: symbol.clone(),
                address,
                functions,
            });
            token_map.insert(
                symbol.clone(),
                TokenInfo {
                    symbol,
                    name: token.name.clone(),
                    address,
                    decimals: token.decimals,
                    wrapped: token.wrapped,
                },
            );
        }

        let mut contracts: HashMap<Address, ContractEntry> = HashMap::new();
        for entry in entries {
            if let Some(existing) = contracts.get(&entry.address) {
                return Err(RegistryError::DuplicateAddress {
                    first: existing.name.clone(),
                    second: entry.name,
                    address: entry.address,
                });
            }
            contracts.insert(entry.address, entry);
        }

        let mut pool_list = Vec::with_capacity(pools.len());
        for [a, b] in pools {
            let (a, b) = (a.to_uppercase(), b.to_uppercase());
            if !token_map.contains_key(&a) || !token_map.contains_key(&b) || a == b {
                return Err(RegistryError::UnknownPoolToken(a, b));
            }
            pool_list.push((a, b));
        }

        Ok(Self {
            router,
            factory,
            tokens: token_map,
            contracts,
            pools: pool_list,
        })
    }

    pub fn router(&self) -> &ContractEntry {
        &self.router
    }

    pub fn factory(&self) -> &ContractEntry {
        &self.factory
    }

    /// Lookup token by symbol (case-insensitive)
    pub fn token(&self, symbol: &str) -> Option<&TokenInfo> {
        self.tokens.get(&symbol.to_uppercase())
    }

    /// Accepts either a registered symbol or the address of a registered token.
    pub fn resolve_token(&self, symbol_or_address: &str) -> Option<&TokenInfo> {
        if let Ok(address) = Address::from_str(symbol_or_address) {
            return self.tokens.values().find(|t| t.address == address);
        }
        self.token(symbol_or_address)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &TokenInfo> {
        self.tokens.values()
    }

    /// Get list of all supported token symbols (sorted alphabetically)
    pub fn supported_tokens(&self) -> Vec<String> {
        self.tokens.keys().cloned().collect()
    }

    pub fn pools(&self) -> &[(String, String)] {
        &self.pools
    }

    /// Checks that `address` is a registered contract exposing `selector`.
    pub fn ensure_callable(
        &self,
        address: Address,
        spec: FunctionSpec,
    ) -> Result<&ContractEntry, RegistryError> {
        let entry = self
            .contracts
            .get(&address)
            .ok_or(RegistryError::UnknownContract(address))?;

        if !entry.supports(spec.selector) {
            return Err(RegistryError::UnsupportedFunction {
                contract: entry.name.clone(),
                signature: spec.signature,
            });
        }

        Ok(entry)
    }
}

fn required(deployments: &Deployments, name: &str) -> Result<Address, RegistryError> {
    let address = deployments
        .get(name)
        .ok_or_else(|| RegistryError::MissingEntry(name.to_string()))?;
    if address == Address::ZERO {
        return Err(RegistryError::ZeroAddress(name.to_string()));
    }
    Ok(address)
}
