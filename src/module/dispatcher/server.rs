use super::supervisor::SupervisorHandle;
use crate::library::EmptyResult;
use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Reply};

/// HTTP server reporting the health of the dispatcher
pub struct HealthJob {
    port: u16,
    supervisor: SupervisorHandle,
}

impl HealthJob {
    /// Creates a new instance from raw parts
    pub fn new(port: u16, supervisor: SupervisorHandle) -> Self {
        Self { port, supervisor }
    }
}

#[async_trait]
impl Job for HealthJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let source_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let (addr, server) = warp::serve(health_routes(self.supervisor.clone()))
            .bind_with_graceful_shutdown(source_addr, manager.termination_signal());

        info!(?addr, "Serving health endpoints");
        manager.ready().await;
        server.await;

        Ok(())
    }
}

/// Liveness and readiness endpoints
pub fn health_routes(
    supervisor: SupervisorHandle,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let ready_route = warp::get()
        .and(warp::path!("v1" / "status" / "ready"))
        .and(warp::any().map(move || supervisor.clone()))
        .and_then(readiness)
        .with(warp::trace::named("ready"));

    let live_route = warp::get()
        .and(warp::path!("v1" / "status" / "live"))
        .map(|| StatusCode::OK)
        .with(warp::trace::named("live"));

    ready_route.or(live_route).with(warp::trace::request())
}

async fn readiness(supervisor: SupervisorHandle) -> Result<StatusCode, Infallible> {
    if supervisor.is_broker_connected().await {
        return Ok(StatusCode::OK);
    }

    match supervisor.reconnect_to_broker().await {
        Ok(()) => info!("Broker connection lost, reconnecting"),
        Err(error) => warn!(%error, "Unable to request reconnect"),
    }

    Ok(StatusCode::BAD_GATEWAY)
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::mock::MockBroker;
    use crate::module::dispatcher::testing::supervisor;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn reconnect_when_not_ready() {
        let broker = MockBroker::new();
        let routes = health_routes(supervisor(&broker).await);
        let ready = || warp::test::request().path("/v1/status/ready");

        assert_eq!(ready().reply(&routes).await.status(), StatusCode::OK);

        broker.disconnect();
        assert_eq!(
            ready().reply(&routes).await.status(),
            StatusCode::BAD_GATEWAY
        );

        sleep(Duration::from_millis(100)).await;

        assert_eq!(broker.connects(), 2);
        assert_eq!(ready().reply(&routes).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reconnect_once_for_concurrent_readiness_checks() {
        let broker = MockBroker::new();
        let routes = health_routes(supervisor(&broker).await);
        let ready = || warp::test::request().path("/v1/status/ready");

        broker.disconnect();
        let (first, second) = tokio::join!(ready().reply(&routes), ready().reply(&routes));
        assert_ne!(first.status(), StatusCode::OK);
        assert_ne!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);

        sleep(Duration::from_millis(100)).await;

        assert_eq!(broker.connects(), 2);
        assert_eq!(ready().reply(&routes).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn report_stopped_supervisors_as_unready() {
        let broker = MockBroker::new();
        let handle = supervisor(&broker).await;
        let routes = health_routes(handle.clone());

        handle.poison_pill().await.unwrap();

        let response = warp::test::request()
            .path("/v1/status/ready")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn always_report_liveness() {
        let broker = MockBroker::new();
        let handle = supervisor(&broker).await;
        let routes = health_routes(handle.clone());

        handle.poison_pill().await.unwrap();

        let response = warp::test::request()
            .path("/v1/status/live")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }
}
