//! Log and trace setup for the two ways the backend runs
//!
//! The long-running service writes JSON lines to stdout and, when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set, exports traces and metrics over OTLP.
//! One-shot commands print their results on stdout, so they log compact text
//! to stderr and never export.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Name reported to collectors
pub const SERVICE: &str = "ucloud-compute";

/// Filter for the service when `RUST_LOG` is not set
pub const SERVICE_FILTER: &str = "info,ucloud=debug,kube=info,tower=warn,hyper=warn";

/// Filter for one-shot commands when `RUST_LOG` is not set
pub const COMMAND_FILTER: &str = "warn,ucloud=info";

/// Resource attribute naming the namespace jobs run in
pub const JOB_NAMESPACE_ATTRIBUTE: &str = "ucloud.job_namespace";

/// Telemetry setup failures
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be built
    #[error("failed to build the OTLP {signal} exporter: {message}")]
    Exporter {
        /// The signal whose exporter failed
        signal: &'static str,
        /// The underlying error message
        message: String,
    },

    /// A global subscriber was already installed
    #[error("a global subscriber is already installed: {0}")]
    Subscriber(String),
}

/// How the process is running
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryMode {
    /// Reconciling jobs in `namespace`
    Service {
        /// Namespace jobs run in
        namespace: String,
        /// OTLP endpoint to export to, if any
        otlp_endpoint: Option<String>,
    },
    /// A command whose stdout is its output
    Command,
}

impl TelemetryMode {
    /// The service mode, exporting when the OTLP endpoint variable is set
    pub fn service(namespace: impl Into<String>) -> Self {
        Self::Service {
            namespace: namespace.into(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty()),
        }
    }

    fn default_filter(&self) -> &'static str {
        match self {
            Self::Service { .. } => SERVICE_FILTER,
            Self::Command => COMMAND_FILTER,
        }
    }
}

/// Flushes exporters when dropped
#[must_use = "exporters stop when the guard is dropped"]
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                warn!(error = %e, "failed to flush traces");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                warn!(error = %e, "failed to flush metrics");
            }
        }
    }
}

/// Install the global subscriber for `mode`
pub fn init_telemetry(mode: TelemetryMode) -> Result<TelemetryGuard, TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(mode.default_filter()));

    let mut guard = TelemetryGuard::default();
    let output: Box<dyn Layer<Registry> + Send + Sync> = match &mode {
        TelemetryMode::Service {
            namespace,
            otlp_endpoint,
        } => {
            let json = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_file(false)
                .with_line_number(false);
            match otlp_endpoint {
                Some(endpoint) => {
                    let resource = service_resource(namespace);
                    let tracer = tracer_provider(endpoint, resource.clone())?;
                    let meter = meter_provider(endpoint, resource)?;
                    global::set_text_map_propagator(TraceContextPropagator::new());
                    global::set_tracer_provider(tracer.clone());
                    global::set_meter_provider(meter.clone());
                    let otel = tracing_opentelemetry::layer().with_tracer(tracer.tracer(SERVICE));
                    guard.tracer = Some(tracer);
                    guard.meter = Some(meter);
                    json.and_then(otel).boxed()
                }
                None => json.boxed(),
            }
        }
        TelemetryMode::Command => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;
    Ok(guard)
}

/// Attributes identifying this backend instance
fn service_resource(namespace: &str) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, SERVICE),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        KeyValue::new(JOB_NAMESPACE_ATTRIBUTE, namespace.to_string()),
    ];
    for (variable, key) in [("POD_NAME", "k8s.pod.name"), ("POD_NAMESPACE", "k8s.namespace.name")] {
        if let Ok(value) = std::env::var(variable) {
            attributes.push(KeyValue::new(key, value));
        }
    }
    Resource::new(attributes)
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "trace",
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
            signal: "metric",
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
    fn test_commands_log_quietly() {
        assert_eq!(TelemetryMode::Command.default_filter(), COMMAND_FILTER);
        let service = TelemetryMode::Service {
            namespace: "apps".to_string(),
            otlp_endpoint: None,
        };
        assert_eq!(service.default_filter(), SERVICE_FILTER);
    }

    #[test]
    fn test_resource_identifies_backend_and_namespace() {
        let resource = service_resource("ucloud-apps");
        let get = |key: &'static str| resource.get(Key::new(key)).map(|v| v.to_string());
        assert_eq!(get(SERVICE_NAME).as_deref(), Some(SERVICE));
        assert_eq!(get(SERVICE_VERSION).as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(get(JOB_NAMESPACE_ATTRIBUTE).as_deref(), Some("ucloud-apps"));
    }

    #[test]
    fn test_guard_without_exporters_drops_cleanly() {
        drop(TelemetryGuard::default());
    }
}
