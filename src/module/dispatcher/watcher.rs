use super::controller::{SubscriptionCache, SubscriptionController};
use super::supervisor::SupervisorError;
use crate::domain::Subscription;
use crate::library::backoff::Backoff;
use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::lock::Mutex;
use futures::StreamExt;
use jatsl::{Job, JobManager};
use kube::api::{Api, ListParams};
use kube::Client;
use kube_runtime::watcher::{self, Event};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const WATCH_RETRY_CEILING: Duration = Duration::from_secs(30);

/// Watches subscription resources and forwards their changes to the controller
///
/// Failed watches are retried with a backoff. The cache outlives both watch failures and job restarts
/// so resources removed in the meantime are reported as deleted by the next listing.
pub struct SubscriptionWatcherJob {
    controller: SubscriptionController,
    namespace: Option<String>,
    cache: Mutex<SubscriptionCache>,
}

impl SubscriptionWatcherJob {
    /// Creates a new instance watching either a single namespace or the whole cluster
    pub fn new(controller: SubscriptionController, namespace: Option<String>) -> Self {
        Self {
            controller,
            namespace,
            cache: Mutex::new(SubscriptionCache::default()),
        }
    }

    /// Applies one item of the watch stream, returns whether it carried an event
    async fn process<E: Display>(
        &self,
        item: Result<Event<Subscription>, E>,
    ) -> Result<bool, SupervisorError> {
        let event = match item {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "Subscription watch failed");
                return Ok(false);
            }
        };

        let notifications = self.cache.lock().await.apply(event);

        for notification in notifications {
            self.controller.notify(notification).await?;
        }

        Ok(true)
    }
}

fn retry_backoff() -> Backoff {
    Backoff::with_limit(u32::MAX).ceiling(WATCH_RETRY_CEILING)
}

#[async_trait]
impl Job for SubscriptionWatcherJob {
    const NAME: &'static str = module_path!();

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let client = Client::try_default().await?;
        let api: Api<Subscription> = match &self.namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };

        let mut events = watcher::watcher(api, ListParams::default()).boxed();
        let mut backoff = retry_backoff();

        info!(namespace = ?self.namespace, "Watching subscriptions");
        manager.ready().await;

        while let Some(item) = events.next().await {
            if self.process(item).await? {
                backoff = retry_backoff();
            } else {
                sleep(backoff.next().unwrap_or(WATCH_RETRY_CEILING)).await;
            }
        }

        warn!("Subscription watch ended");

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::subscription;
    use crate::library::communication::implementation::mock::MockBroker;
    use crate::module::dispatcher::testing::supervisor;

    #[tokio::test]
    async fn report_deletions_missed_during_watch_failures() {
        let broker = MockBroker::new();
        let handle = supervisor(&broker).await;
        let controller = SubscriptionController::new(handle.clone(), false);
        let job = SubscriptionWatcherJob::new(controller, None);
        let kept = subscription("a", "http://localhost");
        let removed = subscription("b", "http://localhost");

        for sub in vec![kept.clone(), removed] {
            let applied = job.process(Ok::<_, String>(Event::Applied(sub))).await;
            assert_eq!(applied, Ok(true));
        }
        assert!(handle.is_running().await);
        assert_eq!(broker.active_subscriptions("b"), 1);

        let failed = job
            .process(Err::<Event<Subscription>, _>("watch failed"))
            .await;
        assert_eq!(failed, Ok(false));

        let relisted = job
            .process(Ok::<_, String>(Event::Restarted(vec![kept])))
            .await;
        assert_eq!(relisted, Ok(true));
        assert!(handle.is_running().await);

        assert_eq!(broker.active_subscriptions("a"), 1);
        assert_eq!(broker.active_subscriptions("b"), 0);
        assert!(!broker.has_durable("b"));
    }

    #[tokio::test]
    async fn stop_on_stopped_supervisor() {
        let broker = MockBroker::new();
        let handle = supervisor(&broker).await;
        let controller = SubscriptionController::new(handle.clone(), false);
        let job = SubscriptionWatcherJob::new(controller, None);

        handle.poison_pill().await.unwrap();

        let result = job
            .process(Ok::<_, String>(Event::Applied(subscription(
                "a",
                "http://localhost",
            ))))
            .await;
        assert_eq!(result, Err(SupervisorError::Stopped));
    }

    #[test]
    fn keep_retrying_watches() {
        assert!(retry_backoff().take(100).all(|delay| delay <= WATCH_RETRY_CEILING));
    }
}
