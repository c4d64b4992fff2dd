use super::error::{ErrorResponse, PublishError};
use crate::constants::{source_headers, EXTENSION_TRACE_CONTEXT};
use crate::domain::{EventEnvelope, PublishRequest, RawEventSource, SourceOrigin, Subject};
use crate::library::communication::SharedConnection;
use crate::library::tracing::constants::trace as attributes;
use crate::library::tracing::{start_span, ContextPropagator};
use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::{pin_mut, Stream, StreamExt};
use hyper::body::{Buf, Bytes};
use jatsl::{Job, JobManager};
use opentelemetry::trace::{Span, SpanKind, StatusCode as SpanStatus, TraceContextExt};
use opentelemetry::Context;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warp::http::{HeaderMap, StatusCode};
use warp::reply::{self, Json, WithStatus};
use warp::{Filter, Rejection, Reply};

#[derive(Debug)]
struct BodyTooLarge {
    limit: u64,
}

impl warp::reject::Reject for BodyTooLarge {}

#[derive(Debug)]
struct UnreadableBody;

impl warp::reject::Reject for UnreadableBody {}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct PublishResponse {
    event_id: String,
}

/// Settings shared by all request handlers
#[derive(Clone)]
pub struct PublishContext {
    connection: Arc<SharedConnection>,
    max_request_size: u64,
    tracing_enabled: bool,
}

impl PublishContext {
    /// Creates a new instance from raw parts
    pub fn new(
        connection: Arc<SharedConnection>,
        max_request_size: u64,
        tracing_enabled: bool,
    ) -> Self {
        Self {
            connection,
            max_request_size,
            tracing_enabled,
        }
    }
}

/// HTTP server accepting events from producers
pub struct ServerJob {
    port: u16,
    context: PublishContext,
}

impl ServerJob {
    /// Creates a new instance from raw parts
    pub fn new(port: u16, context: PublishContext) -> Self {
        Self { port, context }
    }
}

#[async_trait]
impl Job for ServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let source_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let (addr, server) = warp::serve(routes(self.context.clone()))
            .bind_with_graceful_shutdown(source_addr, manager.termination_signal());

        info!(?addr, "Accepting events");
        manager.ready().await;
        server.await;

        Ok(())
    }
}

/// Ingestion and health endpoints
pub fn routes(
    context: PublishContext,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let limit = context.max_request_size;
    let with_context = {
        let context = context.clone();
        warp::any().map(move || context.clone())
    };

    let publish_route = warp::post()
        .and(warp::path!("v1" / "events"))
        .and(content_length_limit(limit))
        .and(warp::header::headers_cloned())
        .and(limited_body(limit))
        .and(with_context.clone())
        .and_then(publish_event)
        .with(warp::trace::named("publish"));

    let ready_route = warp::get()
        .and(warp::path!("v1" / "status" / "ready"))
        .and(with_context)
        .and_then(readiness)
        .with(warp::trace::named("ready"));

    let live_route = warp::get()
        .and(warp::path!("v1" / "status" / "live"))
        .map(|| StatusCode::OK)
        .with(warp::trace::named("live"));

    publish_route
        .or(ready_route)
        .or(live_route)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Rejects requests announcing a body larger than the limit before it is read
fn content_length_limit(limit: u64) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(move |length: Option<u64>| async move {
            match length {
                Some(length) if length > limit => {
                    Err(warp::reject::custom(BodyTooLarge { limit }))
                }
                _ => Ok(()),
            }
        })
        .untuple_one()
}

/// Reads the body, rejecting it as soon as more than `limit` bytes have been received
fn limited_body(limit: u64) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::stream().and_then(move |stream| collect_body(stream, limit))
}

async fn collect_body<S, B>(stream: S, limit: u64) -> Result<Bytes, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(stream);
    let mut body = Vec::new();

    while let Some(chunk) = stream.next().await {
        let mut chunk = chunk.map_err(|error| {
            debug!(%error, "Failed to read request body");
            warp::reject::custom(UnreadableBody)
        })?;

        if (body.len() + chunk.remaining()) as u64 > limit {
            return Err(warp::reject::custom(BodyTooLarge { limit }));
        }

        let bytes = chunk.copy_to_bytes(chunk.remaining());
        body.extend_from_slice(&bytes);
    }

    Ok(Bytes::from(body))
}

async fn publish_event(
    headers: HeaderMap,
    body: Bytes,
    context: PublishContext,
) -> Result<WithStatus<Json>, Infallible> {
    match accept(&headers, &body, &context).await {
        Ok(event_id) => Ok(reply::with_status(
            reply::json(&PublishResponse { event_id }),
            StatusCode::OK,
        )),
        Err(error) => {
            match &error {
                PublishError::Encoding(_) | PublishError::Broker(_) => {
                    warn!(?error, "Failed to publish event")
                }
                _ => debug!(?error, "Rejected event"),
            }

            Ok(ErrorResponse::from(&error).into_reply())
        }
    }
}

async fn accept(
    headers: &HeaderMap,
    body: &[u8],
    context: &PublishContext,
) -> Result<String, PublishError> {
    if body.len() as u64 > context.max_request_size {
        return Err(PublishError::PayloadTooLarge {
            limit: context.max_request_size,
        });
    }

    let request: PublishRequest =
        serde_json::from_slice(body).map_err(PublishError::BadPayload)?;
    let envelope = request.into_envelope(Some(header_source(headers)))?;
    let subject = envelope.subject();
    let event_id = envelope.event_id.clone();

    if context.tracing_enabled {
        publish_traced(&context.connection, envelope, &subject).await?;
    } else {
        publish(&context.connection, &envelope, &subject).await?;
    }

    debug!(%subject, %event_id, "Published event");
    Ok(event_id)
}

/// Wraps the publish in a producer span and embeds its context into the envelope
async fn publish_traced(
    connection: &SharedConnection,
    mut envelope: EventEnvelope,
    subject: &Subject,
) -> Result<(), PublishError> {
    let mut span = start_span("publish event", SpanKind::Producer, None);
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

    let cx = Context::current_with_span(span);
    envelope.set_extension(EXTENSION_TRACE_CONTEXT, ContextPropagator::serialize(&cx));

    let result = publish(connection, &envelope, subject).await;

    if let Err(error) = &result {
        cx.span().set_status(SpanStatus::Error, error.to_string());
    }
    cx.span().end();

    result
}

async fn publish(
    connection: &SharedConnection,
    envelope: &EventEnvelope,
    subject: &Subject,
) -> Result<(), PublishError> {
    let payload = serde_json::to_vec(envelope).map_err(PublishError::Encoding)?;
    connection.publish(subject.as_str(), &payload).await?;
    Ok(())
}

fn header_source(headers: &HeaderMap) -> (RawEventSource, SourceOrigin) {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    let source = RawEventSource {
        environment: read(source_headers::ENVIRONMENT),
        namespace: read(source_headers::NAMESPACE),
        source_type: read(source_headers::TYPE),
    };

    let origin = SourceOrigin::Headers {
        environment: source_headers::ENVIRONMENT,
        namespace: source_headers::NAMESPACE,
        source_type: source_headers::TYPE,
    };

    (source, origin)
}

async fn readiness(context: PublishContext) -> Result<StatusCode, Infallible> {
    if context.connection.is_connected().await {
        Ok(StatusCode::OK)
    } else {
        if context.connection.trigger_reconnect() {
            info!("Broker connection lost, reconnecting");
        }

        Ok(StatusCode::BAD_GATEWAY)
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let response = if let Some(BodyTooLarge { limit }) = rejection.find::<BodyTooLarge>() {
        ErrorResponse::from(&PublishError::PayloadTooLarge { limit: *limit })
    } else if rejection.find::<UnreadableBody>().is_some() {
        ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "bad_payload_syntax",
            "Request body could not be read",
        )
    } else if rejection.is_not_found() {
        ErrorResponse::new(StatusCode::NOT_FOUND, "not_found", "Resource not found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        ErrorResponse::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed",
        )
    } else {
        warn!(?rejection, "Unhandled request rejection");
        ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "Request could not be processed",
        )
    };

    Ok(response.into_reply())
}
