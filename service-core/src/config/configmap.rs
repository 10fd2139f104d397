use super::ConfigStore;
use crate::error::AppError;
use async_trait::async_trait;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Reads the configuration document stored under one key of a ConfigMap.
///
/// The value is parsed as YAML unless the key ends in `.json` or `.toml`.
pub struct ConfigMapStore {
    client: reqwest::Client,
    api_server: String,
    token: Option<String>,
    namespace: String,
    name: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct ConfigMapResource {
    #[serde(default)]
    data: HashMap<String, String>,
}

impl ConfigMapStore {
    /// Store talking to an explicit API server, without credentials.
    pub fn new(
        api_server: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_server: api_server.into().trim_end_matches('/').to_string(),
            token: None,
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
        }
    }

    /// Store using the pod's service account against the in-cluster API server.
    pub fn in_cluster(
        api_server: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, AppError> {
        let token = std::fs::read_to_string(format!("{}/token", SERVICE_ACCOUNT_DIR))
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Failed to read service account token: {}",
                    e
                ))
            })?;

        let mut builder = reqwest::Client::builder();
        if let Ok(ca) = std::fs::read(format!("{}/ca.crt", SERVICE_ACCOUNT_DIR)) {
            let certificate = reqwest::Certificate::from_pem(&ca).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid cluster CA certificate: {}", e))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder.build().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build API client: {}", e))
        })?;

        Ok(Self::new(api_server, namespace, name, key)
            .with_client(client)
            .with_token(token.trim()))
    }

    fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps/{}",
            self.api_server, self.namespace, self.name
        )
    }

    fn format(&self) -> FileFormat {
        if self.key.ends_with(".json") {
            FileFormat::Json
        } else if self.key.ends_with(".toml") {
            FileFormat::Toml
        } else {
            FileFormat::Yaml
        }
    }
}

#[async_trait]
impl ConfigStore for ConfigMapStore {
    async fn fetch(&self) -> Result<Config, AppError> {
        let mut request = self.client.get(self.url());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Failed to reach Kubernetes API at {}: {}",
                self.api_server,
                e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Fetching ConfigMap {}/{} returned {}",
                self.namespace,
                self.name,
                status
            )));
        }

        let resource: ConfigMapResource = response.json().await.map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Malformed ConfigMap response: {}", e))
        })?;

        let document = resource.data.get(&self.key).ok_or_else(|| {
            AppError::config(format!(
                "ConfigMap {}/{} has no key '{}'",
                self.namespace, self.name, self.key
            ))
        })?;

        tracing::info!(
            namespace = %self.namespace,
            configmap = %self.name,
            key = %self.key,
            "Loaded configuration from ConfigMap"
        );

        Ok(Config::builder()
            .add_source(File::from_str(document, self.format()))
            .build()?)
    }

    fn describe(&self) -> String {
        format!("configmap {}/{}[{}]", self.namespace, self.name, self.key)
    }
}
