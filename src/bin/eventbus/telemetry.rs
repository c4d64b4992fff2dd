use opentelemetry::sdk::propagation::TraceContextPropagator;
use opentelemetry::sdk::trace::{self, IdGenerator, Sampler, Tracer};
use opentelemetry::sdk::Resource;
use opentelemetry::trace::TraceError;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::Protocol;
use opentelemetry_semantic_conventions as semcov;
use std::time::Duration;

pub fn tracer(endpoint: &str, service_name: &'static str) -> Result<Tracer, TraceError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let mut resource: Vec<KeyValue> = vec![
        semcov::resource::SERVICE_NAME.string(service_name),
        semcov::resource::SERVICE_NAMESPACE.string("eventbus"),
        semcov::resource::SERVICE_VERSION.string(env!("CARGO_PKG_VERSION")),
    ];

    if let Ok(instance_id) = std::env::var("ID") {
        resource.push(semcov::resource::SERVICE_INSTANCE_ID.string(instance_id));
    }

    opentelemetry_otlp::new_pipeline()
        .with_endpoint(endpoint)
        .with_protocol(Protocol::Grpc)
        .with_timeout(Duration::from_secs(3))
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(IdGenerator::default())
                .with_max_events_per_span(16)
                .with_max_attributes_per_span(16)
                .with_resource(Resource::new(resource)),
        )
        .with_tonic()
        .install_batch(opentelemetry::runtime::Tokio)
}

pub fn flush() {
    global::shutdown_tracer_provider();
}
