//! Tracing and OpenTelemetry setup for both roles of the binary
//!
//! Logs are always JSON on stdout. OTLP export of traces and metrics is only
//! wired when an endpoint is configured (`--metrics-endpoint` or
//! `OTEL_EXPORTER_OTLP_ENDPOINT`); the returned [`TelemetryGuard`] flushes
//! both exporters when dropped.

use std::fmt;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str =
    "info,submariner_addon=debug,kube=info,tower=warn,hyper=warn";

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// `traces` or `metrics`
        signal: &'static str,
        /// Exporter error
        message: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Which half of the addon this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hub controller-manager
    Controller,
    /// Managed-cluster agent
    Agent,
}

impl Role {
    /// Service name reported on traces and metrics
    pub fn service_name(self) -> &'static str {
        match self {
            Role::Controller => "submariner-addon-controller",
            Role::Agent => "submariner-addon-agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Telemetry settings for one process
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Role of this process
    pub role: Role,
    /// OTLP gRPC endpoint; `None` keeps telemetry local
    pub otlp_endpoint: Option<String>,
    /// Managed cluster the agent reports for
    pub cluster_name: Option<String>,
}

impl TelemetryConfig {
    /// Settings for `role`; the endpoint falls back to `OTEL_EXPORTER_OTLP_ENDPOINT`
    pub fn new(role: Role, otlp_endpoint: Option<String>) -> Self {
        Self {
            role,
            otlp_endpoint: otlp_endpoint.or_else(|| std::env::var(OTLP_ENDPOINT_ENV).ok()),
            cluster_name: None,
        }
    }

    /// Tag every span and metric with the managed cluster name
    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new(SERVICE_NAME, self.role.service_name()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ];
        if let Some(cluster) = &self.cluster_name {
            attributes.push(KeyValue::new("submariner.cluster_name", cluster.clone()));
        }
        for (env, key) in [
            ("POD_NAME", "k8s.pod.name"),
            ("POD_NAMESPACE", "k8s.namespace.name"),
            ("NODE_NAME", "k8s.node.name"),
        ] {
            if let Ok(value) = std::env::var(env) {
                attributes.push(KeyValue::new(key, value));
            }
        }
        Resource::new(attributes)
    }
}

/// Keeps the OTLP providers alive; flushes them on drop
#[derive(Default)]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether spans and metrics leave the process
    pub fn exporting(&self) -> bool {
        self.tracer.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("failed to flush traces: {e}");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

/// Install the global subscriber, propagator and, with an endpoint, the OTLP exporters
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let mut guard = TelemetryGuard::default();
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let resource = config.resource();
            let meter = meter_provider(endpoint, resource.clone())?;
            global::set_meter_provider(meter.clone());
            let tracer = tracer_provider(endpoint, resource)?;
            global::set_tracer_provider(tracer.clone());

            let layer = tracing_opentelemetry::layer()
                .with_tracer(tracer.tracer(config.role.service_name()));
            guard.tracer = Some(tracer);
            guard.meter = Some(meter);
            Some(layer)
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(guard)
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "traces",
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Key;

    #[test]
    fn explicit_endpoint_wins() {
        let config = TelemetryConfig::new(Role::Agent, Some("http://collector:4317".to_string()));
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.role.to_string(), "submariner-addon-agent");
    }

    #[test]
    fn agent_resource_names_the_cluster() {
        let resource = TelemetryConfig::new(Role::Agent, None)
            .with_cluster("cluster1")
            .resource();

        assert_eq!(
            resource.get(Key::new(SERVICE_NAME)).map(|v| v.to_string()),
            Some("submariner-addon-agent".to_string())
        );
        assert_eq!(
            resource
                .get(Key::new("submariner.cluster_name"))
                .map(|v| v.to_string()),
            Some("cluster1".to_string())
        );
    }

    #[test]
    fn controller_resource_has_no_cluster() {
        let resource = TelemetryConfig::new(Role::Controller, None).resource();
        assert!(resource.get(Key::new("submariner.cluster_name")).is_none());
    }
}
