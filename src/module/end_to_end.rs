//! Events travelling from the ingestion endpoint through the broker to a webhook

use crate::constants::EXTENSION_TRACE_CONTEXT;
use crate::domain::{subscription, EventEnvelope};
use crate::library::communication::implementation::mock::MockBroker;
use crate::library::communication::{BrokerTarget, ConnectionManager, SharedConnection};
use crate::module::dispatcher::{
    PushHandlerFactory, Supervisor, SupervisorConfig, SupervisorHandle, TransportOptions,
};
use crate::module::publisher::{routes, PublishContext};
use hyper::body::Bytes;
use opentelemetry::global;
use opentelemetry::sdk::propagation::TraceContextPropagator;
use opentelemetry::sdk::trace::TracerProvider;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use warp::http::{HeaderMap, StatusCode};
use warp::Filter;

const SUBJECT: &str = r"test.local\.kyma\.commerce.ec.order\.created.v1";

type Received = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

async fn webhook() -> (SocketAddr, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let route = {
        let received = received.clone();
        warp::post()
            .and(warp::path!("events"))
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .map(move |headers, body| {
                received.lock().unwrap().push((headers, body));
                StatusCode::OK
            })
    };

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    (addr, received)
}

async fn dispatcher(broker: &MockBroker, addr: SocketAddr, tracing: bool) -> SupervisorHandle {
    let manager = ConnectionManager::new(broker.client());
    let target = BrokerTarget::new("cluster", "dispatcher", "mock://");
    let connection = manager.connect_to(&target).await.unwrap();
    let factory = PushHandlerFactory::new(&TransportOptions::default(), tracing).unwrap();
    let (supervisor, _) = Supervisor::spawn(
        manager,
        target,
        Some(connection),
        Arc::new(factory),
        SupervisorConfig {
            ack_wait: Duration::from_secs(30),
            rebind_interval: Duration::from_secs(30),
            action_queue_size: 16,
        },
    );

    supervisor
        .start_subscription_request(subscription("e2e", &format!("http://{}/events", addr)))
        .await
        .unwrap();
    assert!(supervisor.is_running().await);

    supervisor
}

async fn publisher(broker: &MockBroker, tracing: bool) -> PublishContext {
    let manager = ConnectionManager::new(broker.client());
    let target = BrokerTarget::new("cluster", "publisher", "mock://");
    let connection = manager.connect_to(&target).await.unwrap();

    PublishContext::new(
        SharedConnection::new(manager, target, Some(connection)),
        65536,
        tracing,
    )
}

fn event() -> Value {
    json!({
        "source": { "environment": "test", "namespace": "local.kyma.commerce", "type": "ec" },
        "event-type": "order.created",
        "event-type-version": "v1",
        "event-time": "2018-11-02T22:08:41+00:00",
        "data": "hello"
    })
}

async fn await_acknowledgement(broker: &MockBroker) {
    for _ in 0..50 {
        if broker.acknowledgements("e2e") > 0 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// Trace id segment of a W3C `traceparent` value
fn trace_id(traceparent: &str) -> &str {
    traceparent.split('-').nth(1).unwrap_or_default()
}

#[tokio::test]
async fn deliver_published_events_to_subscribers() {
    let broker = MockBroker::new();
    let (addr, received) = webhook().await;
    let supervisor = dispatcher(&broker, addr, false).await;
    let routes = routes(publisher(&broker, false).await);

    let response = warp::test::request()
        .method("POST")
        .path("/v1/events")
        .json(&event())
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let reply: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(reply["event-id"].as_str().map_or(false, |id| !id.is_empty()));

    await_acknowledgement(&broker).await;

    assert_eq!(broker.acknowledgements("e2e"), 1);
    let bodies: Vec<Bytes> = received
        .lock()
        .unwrap()
        .iter()
        .map(|(_, body)| body.clone())
        .collect();
    assert_eq!(bodies, vec![Bytes::from_static(b"\"hello\"")]);

    supervisor.poison_pill().await.unwrap();
}

#[tokio::test]
async fn continue_producer_trace_in_push_requests() {
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(TracerProvider::builder().build());

    let broker = MockBroker::new();
    let (addr, received) = webhook().await;
    let supervisor = dispatcher(&broker, addr, true).await;
    let routes = routes(publisher(&broker, true).await);

    let response = warp::test::request()
        .method("POST")
        .path("/v1/events")
        .json(&event())
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let envelope = EventEnvelope::parse(&broker.published(SUBJECT)[0]).unwrap();
    let producer = envelope
        .extension(EXTENSION_TRACE_CONTEXT)
        .and_then(|context| context["traceparent"].as_str())
        .map(str::to_owned)
        .unwrap();
    assert_eq!(trace_id(&producer).len(), 32);

    await_acknowledgement(&broker).await;
    assert_eq!(broker.acknowledgements("e2e"), 1);

    let consumer = received.lock().unwrap()[0]
        .0
        .get("traceparent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap();

    assert_eq!(trace_id(&consumer), trace_id(&producer));
    assert_ne!(consumer, producer);

    supervisor.poison_pill().await.unwrap();
}
