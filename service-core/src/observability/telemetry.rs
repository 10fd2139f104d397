//! Optional span export.
//!
//! Tracing is switched on by configuring a `service-name`. The resulting
//! [`Telemetry`] is handed to the units that want spans; nothing is installed
//! as a global tracer provider.

use opentelemetry::KeyValue;
use opentelemetry::trace::{Span as _, Status, Tracer as _, TracerProvider as _};
use opentelemetry_otlp::{SpanExporterBuilder, WithExportConfig};
use opentelemetry_sdk::trace::{
    self as sdktrace, BatchConfig, BatchConfigBuilder, BatchSpanProcessor, Sampler, TracerProvider,
};
use opentelemetry_sdk::{Resource, runtime};
use serde::Deserialize;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::error::AppError;

const DEFAULT_COLLECTOR_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_AGENT_PORT: u16 = 4317;

/// Tracing options, read from the top level of the service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TracingConfig {
    pub service_name: Option<String>,
    /// `const`, `probabilistic`, `ratelimiting` or `remote`.
    pub sampler_type: Option<String>,
    pub sampler_param: Option<f64>,
    pub sampler_manager_host_port: Option<String>,
    pub reporter_log_spans: Option<bool>,
    pub agent_host: Option<String>,
    pub agent_port: Option<u16>,
    pub collector_endpoint: Option<String>,
    /// Milliseconds between batch exports.
    pub reporter_flush_interval: Option<u64>,
    pub reporter_max_queue_size: Option<usize>,
}

impl TracingConfig {
    fn sampler(&self) -> Result<Sampler, AppError> {
        let param = self.sampler_param.unwrap_or(1.0);

        match self.sampler_type.as_deref().unwrap_or("const") {
            "const" => Ok(if param != 0.0 {
                Sampler::AlwaysOn
            } else {
                Sampler::AlwaysOff
            }),
            "probabilistic" => Ok(Sampler::TraceIdRatioBased(param.clamp(0.0, 1.0))),
            // No OTLP equivalent; follow the caller's decision, sample roots.
            kind @ ("ratelimiting" | "remote") => {
                tracing::info!(
                    sampler_type = kind,
                    manager = ?self.sampler_manager_host_port,
                    "Sampler type not supported by the OTLP exporter, using parent-based sampling"
                );
                Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            }
            other => Err(AppError::config(format!("Unknown sampler type '{}'", other))),
        }
    }

    fn endpoint(&self) -> String {
        if let Some(endpoint) = &self.collector_endpoint {
            return endpoint.clone();
        }
        match &self.agent_host {
            Some(host) => format!(
                "http://{}:{}",
                host,
                self.agent_port.unwrap_or(DEFAULT_AGENT_PORT)
            ),
            None => DEFAULT_COLLECTOR_ENDPOINT.to_string(),
        }
    }

    fn batch_config(&self) -> BatchConfig {
        let mut batch = BatchConfigBuilder::default();
        if let Some(size) = self.reporter_max_queue_size {
            batch = batch.with_max_queue_size(size);
        }
        if let Some(millis) = self.reporter_flush_interval {
            batch = batch.with_scheduled_delay(Duration::from_millis(millis));
        }
        batch.build()
    }
}

/// Handle for creating spans. Cheap to clone.
#[derive(Clone)]
pub struct Telemetry {
    provider: TracerProvider,
    tracer: sdktrace::Tracer,
    log_spans: bool,
}

impl Telemetry {
    /// Build the exporter pipeline, or return `None` when no service name is
    /// configured.
    pub fn init(config: &TracingConfig) -> Result<Option<Self>, AppError> {
        let Some(service_name) = config.service_name.as_deref().filter(|s| !s.is_empty()) else {
            tracing::info!("No service name set. Skipping initialization of the tracer.");
            return Ok(None);
        };

        let sampler = config.sampler()?;
        let endpoint = config.endpoint();

        let exporter = SpanExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.clone()),
        )
        .build_span_exporter()
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Failed to initialize OTLP exporter for service '{}' at endpoint '{}': {}",
                service_name,
                endpoint,
                e
            ))
        })?;

        let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio)
            .with_batch_config(config.batch_config())
            .build();

        let provider = TracerProvider::builder()
            .with_span_processor(processor)
            .with_config(sdktrace::config().with_sampler(sampler).with_resource(
                Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )]),
            ))
            .build();

        let tracer = provider.tracer(service_name.to_string());

        tracing::info!(
            service_name = %service_name,
            endpoint = %endpoint,
            "Tracer initialized"
        );

        Ok(Some(Self {
            provider,
            tracer,
            log_spans: config.reporter_log_spans.unwrap_or(false),
        }))
    }

    pub fn start_span(&self, name: impl Into<String>) -> TelemetrySpan {
        let name = name.into();
        TelemetrySpan {
            span: self.tracer.start(name.clone()),
            name,
            started: Instant::now(),
            log_spans: self.log_spans,
        }
    }

    /// Export whatever is still queued.
    pub async fn flush(&self) {
        let provider = self.provider.clone();
        // The SDK blocks while flushing; keep it off the async workers.
        let results = tokio::task::spawn_blocking(move || provider.force_flush()).await;
        match results {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Failed to flush spans");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Span flush task failed"),
        }
    }
}

/// A span in progress. Ends when [`TelemetrySpan::end`] or
/// [`TelemetrySpan::finish`] is called.
pub struct TelemetrySpan {
    span: sdktrace::Span,
    name: String,
    started: Instant,
    log_spans: bool,
}

impl TelemetrySpan {
    pub fn set_attribute(&mut self, key: &'static str, value: impl Into<opentelemetry::Value>) {
        self.span.set_attribute(KeyValue::new(key, value));
    }

    pub fn set_error(&mut self, description: impl Into<String>) {
        self.span.set_status(Status::error(description.into()));
    }

    /// Mark the span failed when `result` is an error, then end it.
    pub fn finish<T, E: Display>(mut self, result: &Result<T, E>) {
        if let Err(e) = result {
            self.set_error(e.to_string());
        }
        self.end();
    }

    pub fn end(mut self) {
        self.span.end();
        if self.log_spans {
            tracing::info!(
                span = %self.name,
                duration_ms = self.started.elapsed().as_millis() as u64,
                "Span finished"
            );
        }
    }
}
