use super::{
    BrokerClient, BrokerError, BrokerSession, BrokerTarget, MessageHandler, QueueSubscribeRequest,
    QueueSubscription,
};
use crate::library::helpers::panic_message;
use futures::{Future, FutureExt};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Handle to an established broker session
#[derive(Clone)]
pub struct ConnectionHandle {
    session: Arc<dyn BrokerSession>,
    target: BrokerTarget,
}

impl ConnectionHandle {
    /// Target this handle is connected to
    pub fn target(&self) -> &BrokerTarget {
        &self.target
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("target", &self.target)
            .finish()
    }
}

/// Panic-safe wrapper around a [`BrokerClient`]
///
/// Each operation is executed behind a recovery boundary which converts panics of the underlying
/// client into [`BrokerError::Panicked`]. Operations accept an optional handle so that callers
/// holding no connection receive an error instead of crashing.
#[derive(Clone)]
pub struct ConnectionManager {
    client: Arc<dyn BrokerClient>,
}

impl ConnectionManager {
    /// Creates a new instance wrapping the given client
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self { client }
    }

    /// Establishes a new session with the broker
    pub async fn connect(
        &self,
        cluster_id: &str,
        client_id: &str,
        url: &str,
    ) -> Result<ConnectionHandle, BrokerError> {
        self.connect_to(&BrokerTarget::new(cluster_id, client_id, url))
            .await
    }

    /// Establishes a new session with a known target
    #[instrument(skip(self), fields(cluster_id = %target.cluster_id, client_id = %target.client_id))]
    pub async fn connect_to(&self, target: &BrokerTarget) -> Result<ConnectionHandle, BrokerError> {
        let session = guarded("connect", self.client.connect(target)).await?;
        info!("Connected to broker");

        Ok(ConnectionHandle {
            session,
            target: target.clone(),
        })
    }

    /// Closes the session, fails if no handle is given or it has been closed before
    pub async fn close(&self, handle: Option<&ConnectionHandle>) -> Result<(), BrokerError> {
        let handle = handle.ok_or(BrokerError::NotConnected)?;
        guarded("close", handle.session.close()).await?;
        debug!(cluster_id = %handle.target.cluster_id, "Closed broker connection");
        Ok(())
    }

    /// Publishes a raw payload onto a subject
    pub async fn publish(
        &self,
        handle: Option<&ConnectionHandle>,
        subject: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let handle = handle.ok_or(BrokerError::NotConnected)?;
        guarded("publish", handle.session.publish(subject, payload)).await
    }

    /// Whether the handle refers to a usable session, never panics
    pub fn is_connected(&self, handle: Option<&ConnectionHandle>) -> bool {
        let handle = match handle {
            Some(handle) => handle,
            None => return false,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handle.session.is_connected())) {
            Ok(connected) => connected,
            Err(payload) => {
                warn!(message = %panic_message(payload.as_ref()), "Broker client panicked during connection check");
                false
            }
        }
    }

    /// Creates a durable, queue-grouped consumer on the session
    pub async fn queue_subscribe(
        &self,
        handle: Option<&ConnectionHandle>,
        request: QueueSubscribeRequest,
        handler: MessageHandler,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError> {
        let handle = handle.ok_or(BrokerError::NotConnected)?;
        guarded(
            "queue_subscribe",
            handle.session.queue_subscribe(request, handler),
        )
        .await
    }

    /// Stops a consumer and removes its durable state
    pub async fn unsubscribe(&self, subscription: &dyn QueueSubscription) -> Result<(), BrokerError> {
        guarded("unsubscribe", subscription.unsubscribe()).await
    }

    /// Removes the durable state of a consumer group which has no consumer handle anymore
    pub async fn remove_durable(
        &self,
        handle: Option<&ConnectionHandle>,
        subject: &str,
        durable_name: &str,
    ) -> Result<(), BrokerError> {
        let handle = handle.ok_or(BrokerError::NotConnected)?;
        guarded(
            "remove_durable",
            handle.session.remove_durable(subject, durable_name),
        )
        .await
    }

    /// Stops a consumer while retaining its durable state
    pub async fn close_subscription(
        &self,
        subscription: &dyn QueueSubscription,
    ) -> Result<(), BrokerError> {
        guarded("close_subscription", subscription.close()).await
    }

    /// Whether the consumer still receives messages, never panics
    pub fn is_subscription_active(&self, subscription: &dyn QueueSubscription) -> bool {
        panic::catch_unwind(AssertUnwindSafe(|| subscription.is_active())).unwrap_or(false)
    }
}

async fn guarded<T, F>(operation: &'static str, future: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(operation, %message, "Broker client panicked");
            Err(BrokerError::Panicked { operation, message })
        }
    }
}
