//! Wiring and lifecycle of the two deployable units.
//!
//! The HTTP unit serves the REST API; the data unit owns the store and
//! publishes the catalog service on the configured binding. Both start
//! concurrently and either both run or neither does.

use crate::config::{BindingKind, CatalogConfig, StoreKind};
use crate::handlers;
use crate::services::{
    CatalogService, CatalogServiceImpl, DirectBinding, DocumentStore, MemoryStore, MongoStore,
    Publication, ServiceBinding,
};
use async_trait::async_trait;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use futures::future::{self, Either};
use service_core::bus::{EventBus, RemoteBus};
use service_core::config::ConfigSource;
use service_core::error::AppError;
use service_core::grpc::BusServer;
use service_core::middleware::{metrics_middleware, request_id_middleware, telemetry_middleware};
use service_core::observability::Telemetry;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogService>,
}

pub fn router(state: AppState, telemetry: Option<Telemetry>) -> Router {
    Router::new()
        .route("/products", get(handlers::list_products))
        .route("/product/:item_id", get(handlers::get_product))
        .route("/product", post(handlers::add_product))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(middleware::from_fn_with_state(
            telemetry,
            telemetry_middleware,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// A started unit that can be stopped.
#[async_trait]
pub trait Unit: Send + Sized {
    async fn stop(self);
}

#[async_trait]
impl<U: Unit> Unit for Option<U> {
    async fn stop(self) {
        if let Some(unit) = self {
            unit.stop().await;
        }
    }
}

/// The HTTP front end.
pub struct ApiUnit {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl ApiUnit {
    pub async fn start(
        config: &CatalogConfig,
        catalog: Arc<dyn CatalogService>,
        telemetry: Option<Telemetry>,
    ) -> Result<Self, AppError> {
        let app = router(AppState { catalog }, telemetry);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.catalog.http.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tracing::info!(port = port, "HTTP server listening");

        Ok(Self {
            port,
            shutdown,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Unit for ApiUnit {
    async fn stop(self) {
        self.shutdown.cancel();
        match self.handle.await {
            Ok(Ok(())) => tracing::info!(port = self.port, "HTTP server stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
            Err(e) => tracing::warn!(error = %e, "HTTP server task ended abnormally"),
        }
    }
}

/// The data-access unit: store, catalog service and its publication.
pub struct DataUnit {
    store: Arc<dyn DocumentStore>,
    publication: Publication,
    server: Option<BusServer>,
}

impl DataUnit {
    pub async fn start(
        config: &CatalogConfig,
        binding: &ServiceBinding,
        telemetry: Option<Telemetry>,
    ) -> Result<Self, AppError> {
        let store = open_store(config).await?;
        let service = Arc::new(CatalogServiceImpl::new(store.clone(), telemetry));

        let publication = match binding.publish(service).await {
            Ok(publication) => publication,
            Err(failure) => {
                store.close().await;
                return Err(failure.into());
            }
        };

        let server = match (binding, config.bus.port) {
            (ServiceBinding::EventBus(bus), Some(port)) => {
                match BusServer::start(port, bus.clone()).await {
                    Ok(server) => Some(server),
                    Err(e) => {
                        publication.withdraw().await;
                        store.close().await;
                        return Err(e);
                    }
                }
            }
            _ => None,
        };

        tracing::info!("Data-access unit started");

        Ok(Self {
            store,
            publication,
            server,
        })
    }

    /// Port of the gRPC bus server, when one runs.
    pub fn bus_port(&self) -> Option<u16> {
        self.server.as_ref().map(BusServer::port)
    }
}

#[async_trait]
impl Unit for DataUnit {
    async fn stop(self) {
        self.publication.withdraw().await;
        if let Some(server) = self.server {
            server.stop().await;
        }
        self.store.close().await;
        tracing::info!("Data-access unit stopped");
    }
}

async fn open_store(config: &CatalogConfig) -> Result<Arc<dyn DocumentStore>, AppError> {
    match config.store {
        StoreKind::Memory => {
            tracing::info!("Using in-memory product store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Mongodb => {
            let store = MongoStore::connect(&config.connection_string, &config.db_name)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
            Ok(Arc::new(store))
        }
    }
}

/// Bindings for the API side and the data side, `None` for a unit this
/// process does not run.
fn wire(
    config: &CatalogConfig,
) -> Result<(Option<ServiceBinding>, Option<ServiceBinding>), AppError> {
    let (api, data) = match config.binding {
        BindingKind::Direct => {
            let direct = ServiceBinding::Direct(Arc::new(DirectBinding::new()));
            (direct.clone(), direct)
        }
        BindingKind::Eventbus => {
            let bus = ServiceBinding::EventBus(EventBus::new());
            (bus.clone(), bus)
        }
        BindingKind::Remote => {
            let endpoint = config
                .bus
                .endpoint
                .as_deref()
                .ok_or_else(|| AppError::config("binding 'remote' requires bus.endpoint"))?;
            let remote = RemoteBus::connect_lazy(endpoint).map_err(|e| {
                AppError::config(format!("Invalid bus.endpoint '{}': {}", endpoint, e))
            })?;
            (
                ServiceBinding::Remote(remote),
                ServiceBinding::EventBus(EventBus::new()),
            )
        }
    };

    Ok((
        config.units.runs_api().then_some(api),
        config.units.runs_data().then_some(data),
    ))
}

/// Resolve both futures. On success both units are returned; otherwise the
/// first failure is, after stopping whichever unit did start.
async fn join_units<A, B>(
    a: impl Future<Output = Result<A, AppError>>,
    b: impl Future<Output = Result<B, AppError>>,
) -> Result<(A, B), AppError>
where
    A: Unit,
    B: Unit,
{
    let a = pin!(a);
    let b = pin!(b);

    match future::select(a, b).await {
        Either::Left((Ok(a), b)) => match b.await {
            Ok(b) => Ok((a, b)),
            Err(e) => {
                a.stop().await;
                Err(e)
            }
        },
        Either::Left((Err(e), b)) => {
            if let Ok(b) = b.await {
                b.stop().await;
            }
            Err(e)
        }
        Either::Right((Ok(b), a)) => match a.await {
            Ok(a) => Ok((a, b)),
            Err(e) => {
                b.stop().await;
                Err(e)
            }
        },
        Either::Right((Err(e), a)) => {
            if let Ok(a) = a.await {
                a.stop().await;
            }
            Err(e)
        }
    }
}

pub struct Application {
    data: Option<DataUnit>,
    api: Option<ApiUnit>,
    telemetry: Option<Telemetry>,
}

impl Application {
    /// Start the units `config` asks for.
    pub async fn start(config: CatalogConfig) -> Result<Self, AppError> {
        let (api_binding, data_binding) = wire(&config)?;
        let telemetry = Telemetry::init(&config.tracing)?;

        let data = async {
            match &data_binding {
                Some(binding) => DataUnit::start(&config, binding, telemetry.clone())
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let api = async {
            match &api_binding {
                Some(binding) => ApiUnit::start(&config, binding.proxy(), telemetry.clone())
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (data, api) = match join_units(data, api).await {
            Ok(units) => units,
            Err(e) => {
                tracing::error!("Failed to start catalog units: {}", e);
                if let Some(telemetry) = &telemetry {
                    telemetry.flush().await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            units = ?config.units,
            binding = ?config.binding,
            "Catalog service started"
        );

        Ok(Self {
            data,
            api,
            telemetry,
        })
    }

    pub fn http_port(&self) -> Option<u16> {
        self.api.as_ref().map(ApiUnit::port)
    }

    pub fn bus_port(&self) -> Option<u16> {
        self.data.as_ref().and_then(DataUnit::bus_port)
    }

    /// Run until SIGINT or SIGTERM, then stop.
    pub async fn run_until_stopped(self) {
        shutdown_signal().await;
        self.stop().await;
    }

    /// Drain the HTTP unit first, then the data unit. Best effort.
    pub async fn stop(self) {
        self.api.stop().await;
        self.data.stop().await;
        if let Some(telemetry) = &self.telemetry {
            telemetry.flush().await;
        }
    }
}

/// Resolve the configuration source from the process environment and start.
pub async fn bootstrap() -> Result<Application, AppError> {
    bootstrap_with_env(|key| std::env::var(key).ok()).await
}

pub async fn bootstrap_with_env(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Application, AppError> {
    let source = ConfigSource::resolve(lookup)?;
    let store = source.into_store()?;
    let config = CatalogConfig::load(store.as_ref()).await?;
    Application::start(config).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StopFlag(Arc<AtomicBool>);

    #[async_trait]
    impl Unit for StopFlag {
        async fn stop(self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_join_succeeds_when_both_start() {
        let stopped = Arc::new(AtomicBool::new(false));
        let result = join_units(
            async { Ok(StopFlag(stopped.clone())) },
            async { Ok(StopFlag(stopped.clone())) },
        )
        .await;

        assert!(result.is_ok());
        assert!(!stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_started_unit_is_stopped_when_other_fails() {
        let stopped = Arc::new(AtomicBool::new(false));
        let result = join_units(async { Ok(StopFlag(stopped.clone())) }, async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Err::<StopFlag, _>(AppError::config("api failed"))
        })
        .await;

        assert!(result.is_err());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_first_failure_is_reported() {
        let result = join_units(
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Err::<StopFlag, _>(AppError::config("second"))
            },
            async { Err::<StopFlag, _>(AppError::config("first")) },
        )
        .await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn test_wiring_follows_units() {
        let mut config = CatalogConfig::from_config(
            config::Config::builder()
                .set_override("units", "data")
                .unwrap()
                .set_override("bus.port", 0)
                .unwrap()
                .build()
                .unwrap(),
        )
        .unwrap();

        let (api, data) = wire(&config).unwrap();
        assert!(api.is_none());
        assert!(matches!(data, Some(ServiceBinding::EventBus(_))));

        config.units = crate::config::Units::All;
        config.binding = BindingKind::Direct;
        let (api, data) = wire(&config).unwrap();
        assert!(matches!(api, Some(ServiceBinding::Direct(_))));
        assert!(matches!(data, Some(ServiceBinding::Direct(_))));
    }
}
