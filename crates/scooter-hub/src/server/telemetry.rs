//! # Telemetry Features
//!
//! Console logging through `tracing-subscriber` is always on. OpenTelemetry
//! export is opt-in.
//!
//! ## Feature matrix
//!
//! - `otel`: Exports spans through `tracing-opentelemetry`.
//! - `metrics`: Exports hub counters (connected vehicles, telemetry volume,
//!   routing misses, subscriber lag).
//! - `otlp`: Enables the OTLP/gRPC exporter. The endpoint is taken from the
//!   standard `OTEL_EXPORTER_OTLP_ENDPOINT` variable.
//! - `stdout`: Enables the stdout exporter.
//!
//! Exporters require at least one of `otel` or `metrics`.
//!
//! ```bash
//! cargo run --bin scooter-hub --features otel,metrics,otlp
//! ```
//!
//! The counter helpers at the bottom of this module compile to no-ops when
//! `metrics` is disabled, so call sites never need a `cfg`.

#[cfg(all(feature = "otlp", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'otel' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "scooter-hub";

pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter. Errors are printed, since the
    /// logging pipeline may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {:#?}", err);
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {:#?}", err);
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {:#?}", err);
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {:#?}", err);
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let exporter = opentelemetry_stdout::SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_timeout(std::time::Duration::from_secs(10))
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
struct Handles {
    vehicles_bound: UpDownCounter<i64>,
    telemetry_ingested: Counter<u64>,
    heartbeats: Counter<u64>,
    telemetry_dropped: Counter<u64>,
    commands_routed: Counter<u64>,
    routing_misses: Counter<u64>,
    subscribers: UpDownCounter<i64>,
    subscriber_lag: Counter<u64>,
}

#[cfg(feature = "metrics")]
static HANDLES: OnceLock<Handles> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = HANDLES.set(Handles {
        vehicles_bound: meter
            .i64_up_down_counter("vehicles_bound")
            .with_description("Vehicles currently bound to a stream")
            .build(),
        telemetry_ingested: meter
            .u64_counter("telemetry_ingested")
            .with_description("Telemetry messages accepted by the bus")
            .build(),
        heartbeats: meter
            .u64_counter("heartbeats")
            .with_description("Keep-alive messages consumed by the bus")
            .build(),
        telemetry_dropped: meter
            .u64_counter("telemetry_dropped")
            .with_description("Telemetry dropped because the bus was full")
            .build(),
        commands_routed: meter
            .u64_counter("commands_routed")
            .with_description("Dispatch commands delivered to a vehicle stream")
            .build(),
        routing_misses: meter
            .u64_counter("routing_misses")
            .with_description("Dispatch commands dropped for an unreachable vehicle")
            .build(),
        subscribers: meter
            .i64_up_down_counter("subscribers")
            .with_description("Live feed subscribers")
            .build(),
        subscriber_lag: meter
            .u64_counter("subscriber_lag")
            .with_description("Messages skipped for a subscriber whose queue was full")
            .build(),
    });
}

#[cfg(feature = "metrics")]
fn with_handles(f: impl FnOnce(&Handles)) {
    if let Some(handles) = HANDLES.get() {
        f(handles);
    }
}

#[cfg(feature = "metrics")]
pub fn increment_vehicles_bound() {
    with_handles(|h| h.vehicles_bound.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_vehicles_bound() {}

#[cfg(feature = "metrics")]
pub fn decrement_vehicles_bound() {
    with_handles(|h| h.vehicles_bound.add(-1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_vehicles_bound() {}

#[cfg(feature = "metrics")]
pub fn increment_telemetry_ingested() {
    with_handles(|h| h.telemetry_ingested.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_telemetry_ingested() {}

#[cfg(feature = "metrics")]
pub fn increment_heartbeats() {
    with_handles(|h| h.heartbeats.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_heartbeats() {}

#[cfg(feature = "metrics")]
pub fn increment_telemetry_dropped() {
    with_handles(|h| h.telemetry_dropped.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_telemetry_dropped() {}

#[cfg(feature = "metrics")]
pub fn increment_commands_routed() {
    with_handles(|h| h.commands_routed.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_commands_routed() {}

#[cfg(feature = "metrics")]
pub fn increment_routing_misses() {
    with_handles(|h| h.routing_misses.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_routing_misses() {}

#[cfg(feature = "metrics")]
pub fn increment_subscribers() {
    with_handles(|h| h.subscribers.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_subscribers() {}

#[cfg(feature = "metrics")]
pub fn decrement_subscribers() {
    with_handles(|h| h.subscribers.add(-1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_subscribers() {}

#[cfg(feature = "metrics")]
pub fn increment_subscriber_lag() {
    with_handles(|h| h.subscriber_lag.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_subscriber_lag() {}
