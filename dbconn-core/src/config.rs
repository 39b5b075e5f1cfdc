//! Configuration of a connection factory.
//!
//! The configuration is either deserialized (JSON or any other `serde` format) or read from environment variables:
//!
//! | Variable                     | Description                                         |
//! |------------------------------|-----------------------------------------------------|
//! | `DBCONN_CONNECTION_STRING`   | The default connection string.                      |
//! | `DBCONN_PROVIDER`            | The name of the default dialect provider.           |
//! | `DBCONN_CONNECTION__<NAME>`  | The connection string of the named connection.      |
//! | `DBCONN_PROVIDER__<NAME>`    | The dialect provider of the named connection.       |
//!
//! Names of the named connections are lower-cased.
use crate::factory::ConnectionFactory;
use crate::registry::Registry;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const ENV_CONNECTION_STRING: &str = "DBCONN_CONNECTION_STRING";
pub const ENV_PROVIDER: &str = "DBCONN_PROVIDER";
pub const ENV_NAMED_CONNECTION_PREFIX: &str = "DBCONN_CONNECTION__";
pub const ENV_NAMED_PROVIDER_PREFIX: &str = "DBCONN_PROVIDER__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub connection_string: Option<String>,
    /// The name of a registered dialect provider, the registry default provider is used if not set.
    pub provider_name: Option<String>,
    pub named_connections: BTreeMap<String, NamedConnectionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedConnectionConfig {
    pub connection_string: String,
    /// Defaults to the provider of the factory.
    #[serde(default)]
    pub provider_name: Option<String>,
}

impl FactoryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the configuration from the environment variables of the current process.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read the configuration from a list of variables, the variables not related to the configuration are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = FactoryConfig::default();
        let mut named: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
        for (key, value) in vars {
            if key == ENV_CONNECTION_STRING {
                config.connection_string = Some(value);
            } else if key == ENV_PROVIDER {
                config.provider_name = Some(value);
            } else if let Some(name) = key.strip_prefix(ENV_NAMED_CONNECTION_PREFIX) {
                named.entry(Self::env_name(&key, name)?).or_default().0 = Some(value);
            } else if let Some(name) = key.strip_prefix(ENV_NAMED_PROVIDER_PREFIX) {
                named.entry(Self::env_name(&key, name)?).or_default().1 = Some(value);
            }
        }
        for (name, (connection_string, provider_name)) in named {
            let connection_string = connection_string.ok_or_else(|| {
                Error::invalid_configuration(format!("Missing {}{}", ENV_NAMED_CONNECTION_PREFIX, name.to_uppercase()))
            })?;
            config.named_connections.insert(name, NamedConnectionConfig { connection_string, provider_name });
        }
        Ok(config)
    }

    fn env_name(key: &str, name: &str) -> Result<String> {
        match name.is_empty() {
            true => Err(Error::invalid_configuration(format!("Missing connection name in '{}'", key))),
            false => Ok(name.to_lowercase()),
        }
    }

    /// Build the factory and register its named connections into the given registry.
    ///
    /// All the named connections are validated and their providers resolved before anything is registered: if one of
    /// them is invalid the registry is left unchanged, default provider included.
    pub fn build(&self, registry: Arc<Registry>) -> Result<ConnectionFactory> {
        let provider = match self.provider_name.as_deref() {
            Some(provider_name) => registry.dialects().resolve(provider_name)?,
            None => registry
                .default_dialect_provider()
                .ok_or_else(|| Error::invalid_configuration("No dialect provider is configured"))?,
        };
        let named_connections = self
            .named_connections
            .iter()
            .map(|(name, named)| -> Result<_> {
                if name.is_empty() {
                    return Err(Error::ArgumentNull { name: "named_connection" });
                }
                if named.connection_string.is_empty() {
                    return Err(Error::ArgumentNull { name: "connection_string" });
                }
                let provider = match named.provider_name.as_deref() {
                    Some(provider_name) => registry.dialects().resolve(provider_name)?,
                    None => provider.clone(),
                };
                Ok((name, named, provider))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = ConnectionFactory::builder()
            .dialect_provider(provider.clone())
            .registry(registry.clone())
            .set_global_dialect_provider(false);
        if let Some(connection_string) = &self.connection_string {
            builder = builder.connection_string(connection_string.as_str());
        }
        let factory = builder.build();
        for (name, named, provider) in named_connections {
            factory.register_connection(name, &named.connection_string, provider)?;
        }
        registry.set_default_dialect_provider(provider);
        debug!("Factory built with {} named connection(s)", self.named_connections.len());
        Ok(factory)
    }
}
