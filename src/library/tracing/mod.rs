//! Tracing module
//!
//! This module contains all the tools necessary to enable tracing in conformance with OpenTelemetry.

pub mod constants;
mod propagation;

pub use propagation::ContextPropagator;

use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{SpanKind, Tracer};
use opentelemetry::Context;
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Tracer used by all instrumented code paths
pub fn global_tracer() -> BoxedTracer {
    global::tracer("eventbus/main")
}

/// Marks distributed tracing as active for the remainder of the process lifetime
pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst);
}

/// Whether an exporting tracer has been installed
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Starts a new span of the given kind, optionally continuing a remote parent
pub fn start_span(name: &'static str, kind: SpanKind, parent: Option<Context>) -> BoxedSpan {
    let tracer = global_tracer();
    let mut builder = tracer.span_builder(name).with_kind(kind);

    if let Some(parent) = parent {
        builder = builder.with_parent_context(parent);
    }

    tracer.build(builder)
}
