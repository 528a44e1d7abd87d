use std::path::PathBuf;
use std::{fs, path::Path};

use anyhow::Context;
use dotenv::dotenv;
use envsubst::substitute;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub flow: FlowConfig,
}

impl Config {
    pub async fn from_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenv().ok();

        let path = path.as_ref();
        let file_content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file from path: {}", path.display()))?;

        let env_vars: std::collections::HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| {
                key.starts_with("SERVER_") || key.starts_with("WALLET_") || key.starts_with("RPC_")
            })
            .collect();

        let interpolated = substitute(&file_content, &env_vars)
            .context("failed to substitute environment variables in YAML")?;

        let config: Config =
            serde_yaml::from_str(&interpolated).context("failed to parse YAML configuration")?;

        Ok(config)
    }

    pub fn server_uri(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key: String,
}

/// Where the deployed contracts live and which tokens/pools the DEX exposes.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    /// Address-by-name JSON written by the deployment scripts.
    pub deployments: PathBuf,
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub pools: Vec<[String; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Overrides the deployment artifact entry for this symbol.
    #[serde(default)]
    pub address: Option<String>,
    /// Native-coin wrapper (funded through `deposit()` instead of `mint`).
    #[serde(default)]
    pub wrapped: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_slippage")]
    pub default_slippage: Decimal,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: i64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            default_slippage: default_slippage(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_slippage() -> Decimal {
    Decimal::new(5, 1)
}

fn default_deadline_secs() -> i64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[serial_test::serial]
    async fn test_load_config_from_yaml() {
        let config = Config::from_yaml("config/test.yaml").await.unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);

        assert_eq!(config.rpc.url, "https://rpc.regtest.midl.xyz");

        // Empty key means the service starts without a connected wallet
        assert_eq!(config.wallet.private_key, "");

        assert_eq!(
            config.contracts.deployments,
            PathBuf::from("config/deployments.json")
        );
        assert_eq!(config.contracts.tokens.len(), 2);
        assert_eq!(config.contracts.pools, vec![["WBTC".to_string(), "TBTC".to_string()]]);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_token_entries_are_parsed() {
        let config = Config::from_yaml("config/test.yaml").await.unwrap();

        let wbtc = config
            .contracts
            .tokens
            .iter()
            .find(|t| t.symbol == "WBTC")
            .expect("WBTC configured");
        assert_eq!(wbtc.decimals, 18);
        assert!(wbtc.wrapped);

        let tbtc = config
            .contracts
            .tokens
            .iter()
            .find(|t| t.symbol == "TBTC")
            .expect("TBTC configured");
        assert_eq!(tbtc.decimals, 8);
        assert!(!tbtc.wrapped);
        assert!(tbtc.address.is_none());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_flow_section_defaults_when_missing() {
        let config = Config::from_yaml("config/test.yaml").await.unwrap();

        assert_eq!(config.flow.confirmation_timeout_secs, 120);
        assert_eq!(config.flow.poll_interval_ms, 1000);
        assert_eq!(config.flow.default_slippage, Decimal::new(5, 1));
        assert_eq!(config.flow.deadline_secs, 3600);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_config_with_env_vars() {
        unsafe {
            std::env::set_var("WALLET_PRIVATE_KEY", "0xtest_private_key_123");
        }

        let config = Config::from_yaml("config/default.yaml").await.unwrap();

        assert_eq!(config.wallet.private_key, "0xtest_private_key_123");
        assert!(config.server.port > 0);

        unsafe {
            std::env::remove_var("WALLET_PRIVATE_KEY");
        }
    }

    #[tokio::test]
    async fn test_missing_config_file_is_an_error() {
        let result = Config::from_yaml("config/does-not-exist.yaml").await;
        assert!(result.is_err());
    }
}
