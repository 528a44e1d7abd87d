use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use alloy::primitives::Address;

use super::RegistryError;

/// Address-by-name map written by the deployment scripts (`deployments.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployments {
    addresses: BTreeMap<String, Address>,
}

impl Deployments {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RegistryError::Io(format!("failed to read {}: {e}", path.display()))
        })?;

        Self::from_json(&content)
    }

    /// Parses the artifact. Entries the scripts left unset (`null`) are skipped, so a
    /// contract that never deployed surfaces later as a missing entry.
    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(content)
            .map_err(|e| RegistryError::Parse(format!("invalid deployment artifact: {e}")))?;

        let mut addresses = BTreeMap::new();
        for (name, value) in raw {
            match value {
                serde_json::Value::String(address) => {
                    let address = Address::from_str(&address).map_err(|e| {
                        RegistryError::Parse(format!("invalid address for {name}: {e}"))
                    })?;
                    addresses.insert(name, address);
                }
                serde_json::Value::Null => {
                    tracing::warn!("Deployment entry {name} has no address, skipping");
                }
                other => {
                    return Err(RegistryError::Parse(format!(
                        "deployment entry {name} must be an address string, got {other}"
                    )));
                }
            }
        }

        Ok(Self { addresses })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        Self {
            addresses: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Address> {
        self.addresses.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
