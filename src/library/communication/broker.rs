use super::BrokerError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Coordinates of a broker cluster and the identity used to connect to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    /// Identifier of the cluster, namespaces all subjects
    pub cluster_id: String,
    /// Stable identifier of this client, used as the consumer name
    pub client_id: String,
    /// Connection URL of the broker
    pub url: String,
}

impl BrokerTarget {
    /// Creates a new instance from raw parts
    pub fn new(
        cluster_id: impl Into<String>,
        client_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            client_id: client_id.into(),
            url: url.into(),
        }
    }
}

/// Parameters of a durable, queue-grouped consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSubscribeRequest {
    /// Subject to consume
    pub subject: String,
    /// Queue group, members of the same group share the messages of a subject
    pub queue_group: String,
    /// Name under which the broker keeps track of delivered and acknowledged messages
    pub durable_name: String,
    /// Duration after which unacknowledged messages are delivered again
    pub ack_wait: Duration,
    /// Maximum number of unacknowledged messages handed out concurrently
    pub max_inflight: usize,
}

/// Single message delivered by a queue subscription
#[async_trait]
pub trait BrokerMessage: Send + Sync {
    /// Subject on which the message has been received
    fn subject(&self) -> &str;

    /// Raw message content
    fn payload(&self) -> &[u8];

    /// Marks the message as processed so it will not be delivered again
    async fn acknowledge(&mut self) -> Result<(), BrokerError>;
}

/// Callback invoked for every delivered message on a task of its own
pub type MessageHandler =
    Arc<dyn Fn(Box<dyn BrokerMessage>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Active consumer created by [`BrokerSession::queue_subscribe`]
#[async_trait]
pub trait QueueSubscription: Send + Sync {
    /// Whether the consumer still receives messages
    fn is_active(&self) -> bool;

    /// Stops consuming and removes the durable state from the broker
    async fn unsubscribe(&self) -> Result<(), BrokerError>;

    /// Stops consuming but retains the durable state so a later subscription resumes where this one left off
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Established connection to a broker
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Whether the session is still usable
    fn is_connected(&self) -> bool;

    /// Publishes a raw payload onto a subject
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Creates a durable, queue-grouped consumer with manual acknowledgement
    async fn queue_subscribe(
        &self,
        request: QueueSubscribeRequest,
        handler: MessageHandler,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError>;

    /// Removes the durable state of a consumer group without requiring a live consumer
    async fn remove_durable(&self, subject: &str, durable_name: &str) -> Result<(), BrokerError>;

    /// Closes the session and all consumers created from it
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Factory for [`BrokerSession`]s
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establishes a new session with the target
    async fn connect(&self, target: &BrokerTarget) -> Result<Arc<dyn BrokerSession>, BrokerError>;
}
