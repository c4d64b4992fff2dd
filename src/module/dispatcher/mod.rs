//! Bridge between subscription resources and broker consumers pushing events to webhooks

use crate::harness::{Heart, HeartStone, Module, ModuleTerminationReason};
use crate::library::communication::ConnectionManager;
use crate::library::{BoxedError, EmptyResult};
use crate::module::connect_with_backoff;
use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod controller;
mod handler;
mod options;
mod server;
mod supervisor;
mod watcher;

#[cfg(test)]
mod testing;

pub use controller::{Notification, SubscriptionCache, SubscriptionController};
pub use handler::{MessageHandlerFactory, PushHandlerFactory};
pub use options::{Options, TransportOptions};
pub use server::{health_routes, HealthJob};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError, SupervisorHandle};
pub use watcher::SubscriptionWatcherJob;

/// Module implementation
pub struct Dispatcher {
    options: Options,
    supervisor: Option<SupervisorHandle>,
    supervisor_task: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            supervisor: None,
            supervisor_task: None,
            watchdog: None,
        }
    }
}

#[async_trait]
impl Module for Dispatcher {
    async fn pre_startup(&mut self) -> EmptyResult {
        let manager = ConnectionManager::new(self.options.broker.client());
        let target = self.options.broker.target(&self.options.queueing.id);
        let handle =
            connect_with_backoff(&manager, &target, self.options.broker.connect_attempts).await?;

        let factory = PushHandlerFactory::new(
            &self.options.transport,
            crate::library::tracing::is_enabled(),
        )?;

        let config = SupervisorConfig {
            ack_wait: self.options.ack_wait,
            rebind_interval: self.options.rebind_interval,
            action_queue_size: self.options.action_queue_size,
        };

        let (supervisor, task) =
            Supervisor::spawn(manager, target, Some(handle), Arc::new(factory), config);
        self.supervisor = Some(supervisor);
        self.supervisor_task = Some(task);

        Ok(())
    }

    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let supervisor = self
            .supervisor
            .clone()
            .ok_or("subscription supervisor has not been started")?;

        let controller =
            SubscriptionController::new(supervisor.clone(), self.options.activation_gated);
        let watcher_job =
            SubscriptionWatcherJob::new(controller, self.options.watch_namespace.clone());
        let health_job = HealthJob::new(self.options.port, supervisor);

        let task = self
            .supervisor_task
            .take()
            .ok_or("subscription supervisor is watched already")?;
        let (heart, stone) = Heart::new();
        self.watchdog = Some(tokio::spawn(watch_supervisor(task, stone)));

        info!(
            activation_gated = self.options.activation_gated,
            "Starting event dispatch"
        );
        schedule!(scheduler, { watcher_job, health_job });

        Ok(Some(heart))
    }

    async fn post_shutdown(&mut self, _termination_reason: &ModuleTerminationReason) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        if let Some(supervisor) = self.supervisor.take() {
            if let Err(error) = supervisor.poison_pill().await {
                warn!(%error, "Failed to stop subscription supervisor");
            }
        }
    }
}

/// Kills the module heart once the supervisor task exits, dispatch can not continue without it
async fn watch_supervisor(task: JoinHandle<()>, mut stone: HeartStone) {
    let reason = match task.await {
        Ok(()) => "subscription supervisor stopped".to_owned(),
        Err(error) => format!("subscription supervisor failed: {}", error),
    };

    error!(%reason, "Subscription supervisor exited");
    stone.kill(reason).await;
}
