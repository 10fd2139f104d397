//! Configuration sources.
//!
//! At startup a unit decides where its configuration lives: a ConfigMap when it
//! runs inside a cluster, otherwise the local embedded configuration object.
//! Either way the result is a [`config::Config`] that the caller deserializes
//! into its own settings types.

mod configmap;

pub use configmap::ConfigMapStore;

use crate::error::AppError;
use async_trait::async_trait;
use config::{Config, Environment, File, FileFormat};

/// Presence of this variable means the unit runs inside a cluster. Its value
/// is the namespace the ConfigMap is read from.
pub const CLUSTER_MARKER_VAR: &str = "KUBERNETES_NAMESPACE";
/// Name of the ConfigMap holding the application configuration.
pub const CONFIGMAP_NAME_VAR: &str = "APP_CONFIGMAP_NAME";
/// Key inside the ConfigMap whose value is the configuration document.
pub const CONFIGMAP_KEY_VAR: &str = "APP_CONFIGMAP_KEY";

/// In-cluster API server address, injected into every pod.
pub const API_HOST_VAR: &str = "KUBERNETES_SERVICE_HOST";
pub const API_PORT_VAR: &str = "KUBERNETES_SERVICE_PORT";

const DEFAULT_API_HOST: &str = "kubernetes.default.svc";
const DEFAULT_API_PORT: &str = "443";
const LOCAL_CONFIG_FILE: &str = "configuration";
const ENV_PREFIX: &str = "APP";

/// Where configuration is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Local,
    ConfigMap {
        api_server: String,
        namespace: String,
        name: String,
        key: String,
    },
}

impl ConfigSource {
    /// Resolve the source using `lookup` for environment variables.
    ///
    /// With the cluster marker present both the ConfigMap name and key must be
    /// set; otherwise startup cannot continue.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let Some(namespace) = lookup(CLUSTER_MARKER_VAR) else {
            return Ok(ConfigSource::Local);
        };

        let name = lookup(CONFIGMAP_NAME_VAR).filter(|v| !v.is_empty());
        let key = lookup(CONFIGMAP_KEY_VAR).filter(|v| !v.is_empty());

        match (name, key) {
            (Some(name), Some(key)) => Ok(ConfigSource::ConfigMap {
                api_server: format!(
                    "https://{}:{}",
                    lookup(API_HOST_VAR).unwrap_or_else(|| DEFAULT_API_HOST.into()),
                    lookup(API_PORT_VAR).unwrap_or_else(|| DEFAULT_API_PORT.into())
                ),
                namespace,
                name,
                key,
            }),
            (None, _) => Err(AppError::config(format!(
                "{} is set but {} is missing",
                CLUSTER_MARKER_VAR, CONFIGMAP_NAME_VAR
            ))),
            (_, None) => Err(AppError::config(format!(
                "{} is set but {} is missing",
                CLUSTER_MARKER_VAR, CONFIGMAP_KEY_VAR
            ))),
        }
    }

    /// Build the store that fetches from this source.
    pub fn into_store(self) -> Result<Box<dyn ConfigStore>, AppError> {
        match self {
            ConfigSource::Local => Ok(Box::new(LocalConfigStore::new())),
            ConfigSource::ConfigMap {
                api_server,
                namespace,
                name,
                key,
            } => Ok(Box::new(ConfigMapStore::in_cluster(
                api_server, namespace, name, key,
            )?)),
        }
    }
}

/// Fetches the raw configuration tree.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn fetch(&self) -> Result<Config, AppError>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

/// Fetch the raw tree from `store`, logging where it failed.
pub async fn fetch(store: &dyn ConfigStore) -> Result<Config, AppError> {
    let config = store.fetch().await.map_err(|e| {
        tracing::error!(source = %store.describe(), "Failed to retrieve the configuration: {}", e);
        e
    })?;
    tracing::info!(source = %store.describe(), "Configuration retrieved");
    Ok(config)
}

/// The local embedded configuration object.
///
/// Either an in-memory JSON object or the optional `configuration.*` file in
/// the working directory, layered with `APP__`-prefixed environment variables.
pub struct LocalConfigStore {
    embedded: Option<serde_json::Value>,
}

impl LocalConfigStore {
    pub fn new() -> Self {
        Self { embedded: None }
    }

    /// Use `value` as the embedded object instead of the configuration file.
    pub fn from_json(value: serde_json::Value) -> Self {
        Self {
            embedded: Some(value),
        }
    }
}

impl Default for LocalConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for LocalConfigStore {
    async fn fetch(&self) -> Result<Config, AppError> {
        let builder = match &self.embedded {
            Some(value) => {
                Config::builder().add_source(File::from_str(&value.to_string(), FileFormat::Json))
            }
            None => {
                dotenvy::dotenv().ok();
                Config::builder().add_source(File::with_name(LOCAL_CONFIG_FILE).required(false))
            }
        };

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config)
    }

    fn describe(&self) -> String {
        match self.embedded {
            Some(_) => "embedded configuration object".to_string(),
            None => format!("local file '{}'", LOCAL_CONFIG_FILE),
        }
    }
}
