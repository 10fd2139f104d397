use serde::Deserialize;
use service_core::config::{self as core_config, ConfigStore};
use service_core::error::AppError;
use service_core::observability::TracingConfig;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_CONNECTION_STRING: &str = "mongodb://localhost:27017";
const DEFAULT_DB_NAME: &str = "catalogdb";

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub binding: BindingKind,
    #[serde(default)]
    pub bus: BusConfig,
    /// Read from the same tree in a separate pass; its keys sit at the top level.
    #[serde(skip)]
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusConfig {
    /// gRPC port the data-access unit serves its event bus on.
    pub port: Option<u16>,
    /// gRPC endpoint of a remote event bus, used by the HTTP unit.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Mongodb,
    Memory,
}

/// Which deployable units this process runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    All,
    Api,
    Data,
}

impl Units {
    pub fn runs_api(self) -> bool {
        matches!(self, Units::All | Units::Api)
    }

    pub fn runs_data(self) -> bool {
        matches!(self, Units::All | Units::Data)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    Direct,
    #[default]
    Eventbus,
    Remote,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_connection_string() -> String {
    DEFAULT_CONNECTION_STRING.to_string()
}

fn default_db_name() -> String {
    DEFAULT_DB_NAME.to_string()
}

impl CatalogConfig {
    /// Fetch from `store` and validate the unit wiring.
    pub async fn load(store: &dyn ConfigStore) -> Result<Self, AppError> {
        let raw = core_config::fetch(store).await?;
        Self::from_config(raw)
    }

    pub fn from_config(raw: config::Config) -> Result<Self, AppError> {
        let mut settings: CatalogConfig = raw.clone().try_deserialize()?;
        settings.tracing = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.binding == BindingKind::Direct && self.units != Units::All {
            return Err(AppError::config(
                "binding 'direct' needs both units in one process (units = all)",
            ));
        }
        if self.units == Units::Api && self.binding != BindingKind::Remote {
            return Err(AppError::config("units 'api' requires binding 'remote'"));
        }
        if self.units == Units::Data && self.bus.port.is_none() {
            return Err(AppError::config("units 'data' requires bus.port"));
        }
        if self.binding == BindingKind::Remote {
            if self.bus.endpoint.is_none() {
                return Err(AppError::config("binding 'remote' requires bus.endpoint"));
            }
            if self.units.runs_data() && self.bus.port.is_none() {
                return Err(AppError::config(
                    "binding 'remote' with a local data unit requires bus.port",
                ));
            }
        }
        Ok(())
    }
}
