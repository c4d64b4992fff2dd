//! Push delivery of broker messages to webhook endpoints
//!
//! Every subscription receives a handler bound to its endpoint. Messages are acknowledged only once
//! the endpoint answered with a success status, anything else leaves the message pending so the
//! broker delivers it again after the ack-wait duration elapsed.

use super::options::TransportOptions;
use crate::constants::{push_headers, EXTENSION_TRACE_CONTEXT};
use crate::domain::{EventEnvelope, Subscription};
use crate::library::communication::{BrokerMessage, MessageHandler};
use crate::library::helpers::panic_message;
use crate::library::tracing::constants::trace as attributes;
use crate::library::tracing::{start_span, ContextPropagator};
use futures::FutureExt;
use opentelemetry::trace::{Span, SpanKind, StatusCode as SpanStatus, TraceContextExt};
use opentelemetry::{global, Context};
use opentelemetry_http::HeaderInjector;
use opentelemetry_semantic_conventions as semcov;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Creates the callbacks invoked for messages of a subscription
pub trait MessageHandlerFactory: Send + Sync {
    /// Builds a handler delivering to the given subscription
    fn create(&self, subscription: &Subscription) -> MessageHandler;
}

/// Delivery parameters captured from a subscription at bind time
#[derive(Debug)]
struct PushTarget {
    endpoint: String,
    timeout: Duration,
    name: String,
    namespace: String,
    include_subscription_name_header: bool,
    include_topic_header: bool,
}

impl From<&Subscription> for PushTarget {
    fn from(subscription: &Subscription) -> Self {
        Self {
            endpoint: subscription.spec.endpoint.clone(),
            timeout: subscription.push_request_timeout(),
            name: subscription.name().to_owned(),
            namespace: subscription.namespace().to_owned(),
            include_subscription_name_header: subscription.spec.include_subscription_name_header,
            include_topic_header: subscription.spec.include_topic_header,
        }
    }
}

/// Factory for handlers which push events to webhooks over a single, shared HTTP client
#[derive(Clone)]
pub struct PushHandlerFactory {
    client: Client,
    tracing_enabled: bool,
}

impl PushHandlerFactory {
    /// Creates a new instance with a connection pool configured from the transport options
    pub fn new(options: &TransportOptions, tracing_enabled: bool) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(options.max_idle_connections)
            .pool_idle_timeout(options.idle_connection_timeout)
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            tracing_enabled,
        })
    }
}

impl MessageHandlerFactory for PushHandlerFactory {
    fn create(&self, subscription: &Subscription) -> MessageHandler {
        let target = Arc::new(PushTarget::from(subscription));
        let client = self.client.clone();
        let tracing_enabled = self.tracing_enabled;

        Arc::new(move |message| {
            let target = target.clone();
            let client = client.clone();

            async move { push(&client, &target, tracing_enabled, message).await }.boxed()
        })
    }
}

async fn push(
    client: &Client,
    target: &PushTarget,
    tracing_enabled: bool,
    mut message: Box<dyn BrokerMessage>,
) {
    let envelope = EventEnvelope::parse(message.payload());
    let body = match &envelope {
        Some(envelope) => {
            serde_json::to_vec(&envelope.data).unwrap_or_else(|_| message.payload().to_vec())
        }
        None => {
            trace!(endpoint = %target.endpoint, "Forwarding payload which is not an event envelope");
            message.payload().to_vec()
        }
    };

    let mut request = client
        .post(&target.endpoint)
        .header(CONTENT_TYPE, "application/json")
        .timeout(target.timeout)
        .body(body);

    if target.include_subscription_name_header {
        request = request.header(push_headers::SUBSCRIPTION, &target.name);
    }

    if target.include_topic_header {
        request = request.header(push_headers::TOPIC, message.subject());
    }

    let cx = match &envelope {
        Some(envelope) if tracing_enabled => start_consumer_span(target, envelope),
        _ => None,
    };

    if let (Some(cx), Some(envelope)) = (&cx, &envelope) {
        request = with_trace_headers(request, cx, envelope);
    }

    let delivered = match request.send().await {
        Ok(response) => {
            let status = response.status();

            if let Some(cx) = &cx {
                cx.span()
                    .set_attribute(semcov::trace::HTTP_STATUS_CODE.i64(status.as_u16() as i64));
            }

            if is_delivered(status) {
                true
            } else {
                warn!(endpoint = %target.endpoint, %status, "Webhook rejected event");
                if let Some(cx) = &cx {
                    cx.span()
                        .set_status(SpanStatus::Error, format!("webhook responded {}", status));
                }
                false
            }
        }
        Err(error) => {
            warn!(endpoint = %target.endpoint, %error, "Failed to push event");
            if let Some(cx) = &cx {
                cx.span().set_status(SpanStatus::Error, error.to_string());
            }
            false
        }
    };

    if let Some(cx) = &cx {
        cx.span().end();
    }

    if delivered {
        acknowledge(message.as_mut(), target).await;
    }
}

/// Whether the webhook response counts as a successful delivery
fn is_delivered(status: StatusCode) -> bool {
    status.is_success()
}

async fn acknowledge(message: &mut dyn BrokerMessage, target: &PushTarget) {
    match AssertUnwindSafe(message.acknowledge()).catch_unwind().await {
        Ok(Ok(_)) => debug!(endpoint = %target.endpoint, "Delivered event"),
        Ok(Err(error)) => warn!(endpoint = %target.endpoint, %error, "Failed to acknowledge event"),
        Err(payload) => warn!(
            endpoint = %target.endpoint,
            message = %panic_message(payload.as_ref()),
            "Broker client panicked while acknowledging event"
        ),
    }
}

/// Continues the trace of the producer if the envelope carries one
fn start_consumer_span(target: &PushTarget, envelope: &EventEnvelope) -> Option<Context> {
    let carrier = envelope
        .extension(EXTENSION_TRACE_CONTEXT)
        .and_then(ContextPropagator::deserialize)?;
    let parent = ContextPropagator::extract(&carrier);

    let mut span = start_span("push event", SpanKind::Consumer, Some(parent));
    span.set_attribute(attributes::SUBSCRIPTION_NAME.string(target.name.clone()));
    span.set_attribute(attributes::SUBSCRIPTION_NAMESPACE.string(target.namespace.clone()));
    span.set_attribute(
        attributes::EVENT_SOURCE_ENVIRONMENT.string(envelope.source.environment.clone()),
    );
    span.set_attribute(
        attributes::EVENT_SOURCE_NAMESPACE.string(envelope.source.namespace.clone()),
    );
    span.set_attribute(
        attributes::EVENT_SOURCE_TYPE.string(envelope.source.source_type.clone()),
    );
    span.set_attribute(attributes::EVENT_TYPE.string(envelope.event_type.clone()));
    span.set_attribute(
        attributes::EVENT_TYPE_VERSION.string(envelope.event_type_version.clone()),
    );
    span.set_attribute(attributes::EVENT_ID.string(envelope.event_id.clone()));
    span.set_attribute(semcov::trace::HTTP_METHOD.string("POST"));
    span.set_attribute(semcov::trace::HTTP_URL.string(target.endpoint.clone()));

    Some(Context::current_with_span(span))
}

fn with_trace_headers(
    request: RequestBuilder,
    cx: &Context,
    envelope: &EventEnvelope,
) -> RequestBuilder {
    let mut headers = HeaderMap::new();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(&mut headers))
    });

    let metadata = [
        (
            push_headers::SOURCE_ENVIRONMENT,
            &envelope.source.environment,
        ),
        (push_headers::SOURCE_NAMESPACE, &envelope.source.namespace),
        (push_headers::SOURCE_TYPE, &envelope.source.source_type),
        (push_headers::EVENT_TYPE, &envelope.event_type),
        (push_headers::EVENT_TYPE_VERSION, &envelope.event_type_version),
        (push_headers::EVENT_ID, &envelope.event_id),
        (push_headers::EVENT_TIME, &envelope.event_time),
    ];

    for (name, value) in metadata.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    request.headers(headers)
}
