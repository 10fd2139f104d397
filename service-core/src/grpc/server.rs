//! gRPC server hosting a local [`EventBus`] for remote callers.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use super::proto::{FILE_DESCRIPTOR_SET, message_bus_server::MessageBusServer};
use crate::bus::{BusGrpcService, EventBus};
use crate::error::AppError;

/// Builder for the bus gRPC server's transport settings.
pub struct GrpcServerBuilder {
    http2_keepalive_interval: Option<Duration>,
    http2_keepalive_timeout: Option<Duration>,
    concurrency_limit: Option<usize>,
}

impl Default for GrpcServerBuilder {
    fn default() -> Self {
        Self {
            http2_keepalive_interval: Some(Duration::from_secs(30)),
            http2_keepalive_timeout: Some(Duration::from_secs(10)),
            concurrency_limit: None,
        }
    }
}

impl GrpcServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set HTTP/2 keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.http2_keepalive_interval = Some(interval);
        self
    }

    /// Set concurrency limit per connection.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Build a tonic Server with the configured settings.
    pub fn build_server(&self) -> Server {
        let mut server = Server::builder();

        if let Some(interval) = self.http2_keepalive_interval {
            server = server.http2_keepalive_interval(Some(interval));
        }

        if let Some(timeout) = self.http2_keepalive_timeout {
            server = server.http2_keepalive_timeout(Some(timeout));
        }

        if let Some(limit) = self.concurrency_limit {
            server = server.concurrency_limit_per_connection(limit);
        }

        server
    }
}

/// A running bus server. Stop it with [`BusServer::stop`].
pub struct BusServer {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl BusServer {
    /// Bind `port` (0 picks a free one) and serve `bus` with default settings.
    pub async fn start(port: u16, bus: EventBus) -> Result<Self, AppError> {
        Self::start_with(GrpcServerBuilder::default(), port, bus).await
    }

    pub async fn start_with(
        builder: GrpcServerBuilder,
        port: u16,
        bus: EventBus,
    ) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind bus gRPC listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<MessageBusServer<BusGrpcService>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "Failed to build reflection service: {}",
                    e
                ))
            })?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = builder
            .build_server()
            .add_service(health_service)
            .add_service(reflection_service)
            .add_service(MessageBusServer::new(BusGrpcService::new(bus)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                signal.cancelled().await;
            });

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Bus gRPC server error");
            }
        });

        tracing::info!(port = port, "Bus gRPC server listening");

        Ok(Self {
            port,
            shutdown,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting calls and wait for in-flight ones to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Bus gRPC server task ended abnormally");
        }
        tracing::info!(port = self.port, "Bus gRPC server stopped");
    }
}
