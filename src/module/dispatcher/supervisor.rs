//! Single-owner actor reconciling subscriptions with broker consumers
//!
//! All state lives inside one task which processes [`Action`]s in the order they have been submitted.
//! Callers interact through a cloneable [`SupervisorHandle`], queries are answered on a dedicated
//! reply channel. A periodic rebind pass retries subscriptions whose consumer is missing or inactive
//! and removes durable state left behind by subscriptions stopped while no consumer existed.

use super::handler::MessageHandlerFactory;
use crate::domain::Subscription;
use crate::library::communication::{
    BrokerTarget, ConnectionHandle, ConnectionManager, QueueSubscribeRequest, QueueSubscription,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Errors returned to callers of the supervisor
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    /// The supervisor has received its poison pill and no longer accepts actions
    #[error("supervisor has been stopped")]
    Stopped,
}

/// Tunables of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Duration after which unacknowledged messages are delivered again
    pub ack_wait: Duration,
    /// Interval of the rebind pass
    pub rebind_interval: Duration,
    /// Capacity of the action queue, submitting blocks once it is full
    pub action_queue_size: usize,
}

#[derive(Debug)]
enum Action {
    Start(Box<Subscription>),
    Stop(Box<Subscription>),
    IsRunning(oneshot::Sender<bool>),
    IsBrokerConnected(oneshot::Sender<bool>),
    Reconnect,
    PoisonPill(oneshot::Sender<()>),
}

/// Submits actions to a running [`Supervisor`]
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Action>,
}

impl SupervisorHandle {
    async fn submit(&self, action: Action) -> Result<(), SupervisorError> {
        self.tx
            .send(action)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }

    async fn query(&self, action: impl FnOnce(oneshot::Sender<bool>) -> Action) -> bool {
        let (tx, rx) = oneshot::channel();

        if self.submit(action(tx)).await.is_err() {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Binds the subscription unless it is known already
    pub async fn start_subscription_request(
        &self,
        subscription: Subscription,
    ) -> Result<(), SupervisorError> {
        self.submit(Action::Start(Box::new(subscription))).await
    }

    /// Removes the consumer of the subscription along with its durable state
    pub async fn stop_subscription_request(
        &self,
        subscription: Subscription,
    ) -> Result<(), SupervisorError> {
        self.submit(Action::Stop(Box::new(subscription))).await
    }

    /// Closes all consumers and the broker connection, resolves once the supervisor has stopped.
    /// No further actions are accepted afterwards.
    pub async fn poison_pill(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Action::PoisonPill(tx)).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Whether the supervisor still accepts actions
    pub async fn is_running(&self) -> bool {
        self.query(Action::IsRunning).await
    }

    /// Whether the broker connection of the supervisor is usable
    pub async fn is_broker_connected(&self) -> bool {
        self.query(Action::IsBrokerConnected).await
    }

    /// Replaces the broker connection, consumers are recreated by an immediate rebind pass
    pub async fn reconnect_to_broker(&self) -> Result<(), SupervisorError> {
        self.submit(Action::Reconnect).await
    }
}

struct Binding {
    subscription: Subscription,
    handle: Option<Box<dyn QueueSubscription>>,
}

/// Owner of all subscription to consumer bindings
pub struct Supervisor {
    manager: ConnectionManager,
    target: BrokerTarget,
    connection: Option<ConnectionHandle>,
    factory: Arc<dyn MessageHandlerFactory>,
    bindings: HashMap<String, Binding>,
    /// Durable names of stopped subscriptions whose state could not be removed yet, keyed to their subject
    orphans: HashMap<String, String>,
    running: bool,
    ack_wait: Duration,
}

impl Supervisor {
    /// Spawns the supervisor task and returns a handle to it
    pub fn spawn(
        manager: ConnectionManager,
        target: BrokerTarget,
        connection: Option<ConnectionHandle>,
        factory: Arc<dyn MessageHandlerFactory>,
        config: SupervisorConfig,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.action_queue_size.max(1));

        let supervisor = Self {
            manager,
            target,
            connection,
            factory,
            bindings: HashMap::new(),
            orphans: HashMap::new(),
            running: true,
            ack_wait: config.ack_wait,
        };

        let task = tokio::spawn(supervisor.run(rx, config.rebind_interval));

        (SupervisorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Action>, rebind_interval: Duration) {
        let mut ticker = interval_at(Instant::now() + rebind_interval, rebind_interval);

        loop {
            tokio::select! {
                action = rx.recv() => match action {
                    Some(Action::PoisonPill(reply)) => {
                        self.shutdown(&mut rx).await;
                        reply.send(()).ok();
                        break;
                    }
                    Some(action) => self.handle(action).await,
                    None => {
                        self.shutdown(&mut rx).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.periodic_rebind().await,
            }
        }

        info!("Supervisor stopped");
    }

    async fn handle(&mut self, action: Action) {
        trace!(?action, "Processing action");

        match action {
            Action::Start(subscription) => self.start(*subscription).await,
            Action::Stop(subscription) => self.stop(&subscription).await,
            Action::IsRunning(reply) => {
                reply.send(self.running).ok();
            }
            Action::IsBrokerConnected(reply) => {
                reply
                    .send(self.manager.is_connected(self.connection.as_ref()))
                    .ok();
            }
            Action::Reconnect => {
                if self.manager.is_connected(self.connection.as_ref()) {
                    debug!("Broker connection is healthy, ignoring reconnect request");
                } else {
                    self.reconnect().await;
                    self.rebind().await;
                }
            }
            Action::PoisonPill(reply) => {
                reply.send(()).ok();
            }
        }
    }

    #[instrument(skip(self, subscription), fields(name = %subscription.cache_key()))]
    async fn start(&mut self, subscription: Subscription) {
        let uid = match subscription.uid() {
            Some(uid) => uid.to_owned(),
            None => {
                warn!("Ignoring subscription without uid");
                return;
            }
        };

        match self.bindings.get(&uid) {
            Some(binding) if binding.handle.is_some() => {
                debug!(%uid, "Subscription is bound already")
            }
            Some(_) => debug!(%uid, "Subscription is pending, deferring to rebind pass"),
            None => {
                self.orphans.remove(&uid);
                let handle = self.bind(&subscription).await;
                self.bindings.insert(
                    uid,
                    Binding {
                        subscription,
                        handle,
                    },
                );
            }
        }
    }

    #[instrument(skip(self, subscription), fields(name = %subscription.cache_key()))]
    async fn stop(&mut self, subscription: &Subscription) {
        let (uid, binding) = match subscription
            .uid()
            .and_then(|uid| self.bindings.remove_entry(uid))
        {
            Some(entry) => entry,
            None => {
                debug!("Subscription is not known");
                return;
            }
        };

        match binding.handle {
            Some(handle) => match self.manager.unsubscribe(handle.as_ref()).await {
                Ok(_) => info!("Unbound subscription"),
                Err(error) => warn!(%error, "Failed to unsubscribe"),
            },
            None => {
                let subject = binding.subscription.subject().to_string();
                self.orphans.insert(uid, subject);
                self.remove_orphans().await;
            }
        }
    }

    /// Removes the durable state of stopped subscriptions which had no consumer, failures are retried
    /// by the next rebind pass
    async fn remove_orphans(&mut self) {
        if !self.manager.is_connected(self.connection.as_ref()) {
            debug!(count = self.orphans.len(), "Deferring durable removal until reconnected");
            return;
        }

        let orphans: Vec<(String, String)> = self.orphans.drain().collect();

        for (durable, subject) in orphans {
            match self
                .manager
                .remove_durable(self.connection.as_ref(), &subject, &durable)
                .await
            {
                Ok(_) => info!(%durable, %subject, "Removed durable state of stopped subscription"),
                Err(error) => {
                    warn!(%durable, %subject, %error, "Failed to remove durable state");
                    self.orphans.insert(durable, subject);
                }
            }
        }
    }

    /// Creates the consumer of a subscription, failures leave the subscription unbound
    async fn bind(&self, subscription: &Subscription) -> Option<Box<dyn QueueSubscription>> {
        let uid = subscription.uid()?;
        let subject = subscription.subject();

        let request = QueueSubscribeRequest {
            subject: subject.to_string(),
            queue_group: uid.to_owned(),
            durable_name: uid.to_owned(),
            ack_wait: self.ack_wait,
            max_inflight: subscription.spec.max_inflight,
        };

        let handler = self.factory.create(subscription);

        match self
            .manager
            .queue_subscribe(self.connection.as_ref(), request, handler)
            .await
        {
            Ok(handle) => {
                info!(%uid, %subject, "Bound subscription");
                Some(handle)
            }
            Err(error) => {
                warn!(%uid, %subject, %error, "Failed to bind subscription");
                None
            }
        }
    }

    async fn periodic_rebind(&mut self) {
        if !self.manager.is_connected(self.connection.as_ref()) {
            warn!("Broker connection lost");
            self.reconnect().await;
        }

        self.rebind().await;
    }

    /// Binds all subscriptions lacking an active consumer
    async fn rebind(&mut self) {
        if self.connection.is_none() {
            debug!("Skipping rebind without broker connection");
            return;
        }

        if !self.orphans.is_empty() {
            self.remove_orphans().await;
        }

        let manager = &self.manager;
        let stale: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, binding)| match &binding.handle {
                Some(handle) => !manager.is_subscription_active(handle.as_ref()),
                None => true,
            })
            .map(|(uid, _)| uid.clone())
            .collect();

        if !stale.is_empty() {
            debug!(count = stale.len(), "Rebinding subscriptions");
        }

        for uid in stale {
            let subscription = match self.bindings.get_mut(&uid) {
                Some(binding) => {
                    if let Some(handle) = binding.handle.take() {
                        self.manager.close_subscription(handle.as_ref()).await.ok();
                    }
                    binding.subscription.clone()
                }
                None => continue,
            };

            let handle = self.bind(&subscription).await;

            if let Some(binding) = self.bindings.get_mut(&uid) {
                binding.handle = handle;
            }
        }
    }

    /// Closes all consumers while retaining their durable state and replaces the connection
    async fn reconnect(&mut self) {
        self.close_subscriptions().await;

        if let Err(error) = self.manager.close(self.connection.as_ref()).await {
            debug!(%error, "Failed to close previous broker connection");
        }

        self.connection = match self.manager.connect_to(&self.target).await {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!(%error, "Failed to reconnect to broker");
                None
            }
        };
    }

    async fn close_subscriptions(&mut self) {
        for (uid, binding) in self.bindings.iter_mut() {
            if let Some(handle) = binding.handle.take() {
                if let Err(error) = self.manager.close_subscription(handle.as_ref()).await {
                    debug!(%uid, %error, "Failed to close subscription");
                }
            }
        }
    }

    async fn shutdown(&mut self, rx: &mut mpsc::Receiver<Action>) {
        info!("Supervisor received poison pill");
        self.running = false;
        rx.close();

        while let Some(action) = rx.recv().await {
            match action {
                Action::IsRunning(reply) | Action::IsBrokerConnected(reply) => {
                    reply.send(false).ok();
                }
                Action::PoisonPill(reply) => {
                    reply.send(()).ok();
                }
                action => debug!(?action, "Discarding action submitted before shutdown"),
            }
        }

        self.close_subscriptions().await;

        if let Err(error) = self.manager.close(self.connection.as_ref()).await {
            debug!(%error, "Failed to close broker connection");
        }
        self.connection = None;
    }
}
