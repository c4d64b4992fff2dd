use super::subscription::{RedisConsumer, RedisSubscription};
use super::{
    is_connection_error, stream_key, ERROR_CODE_GROUP_EXISTS, STREAM_ID_NEW, STREAM_ID_TAIL,
    STREAM_PAYLOAD_KEY,
};
use crate::library::communication::{
    BrokerClient, BrokerError, BrokerSession, BrokerTarget, MessageHandler, QueueSubscribeRequest,
    QueueSubscription,
};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamMaxlen;
use redis::{AsyncCommands, Client, RedisError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// [`BrokerClient`] implementation backed by a redis server
pub struct RedisBrokerClient {
    retention: usize,
}

impl RedisBrokerClient {
    /// Creates a new client which caps every stream at roughly `retention` entries
    pub fn new(retention: usize) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl BrokerClient for RedisBrokerClient {
    async fn connect(&self, target: &BrokerTarget) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let client = Client::open(target.url.as_str())?;
        let connection = client.get_multiplexed_tokio_connection().await?;

        Ok(Arc::new(RedisSession::new(
            client,
            connection,
            target.clone(),
            self.retention,
        )))
    }
}

pub(super) struct SessionHealth {
    closed: AtomicBool,
    healthy: AtomicBool,
}

impl SessionHealth {
    /// Records connection failures and converts the error
    pub(super) fn observe(&self, error: RedisError) -> BrokerError {
        if is_connection_error(&error) {
            self.mark_unhealthy();
        }

        error.into()
    }

    pub(super) fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            warn!("Lost connection to redis");
        }
    }

    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.healthy.load(Ordering::SeqCst)
    }
}

/// Session on a redis server
///
/// Publishing and acknowledging share one multiplexed connection while every consumer
/// receives an owned connection for its blocking reads.
pub struct RedisSession {
    client: Client,
    connection: MultiplexedConnection,
    target: BrokerTarget,
    retention: usize,
    health: Arc<SessionHealth>,
    shutdown: watch::Sender<bool>,
    shutdown_signal: watch::Receiver<bool>,
}

impl RedisSession {
    fn new(
        client: Client,
        connection: MultiplexedConnection,
        target: BrokerTarget,
        retention: usize,
    ) -> Self {
        let (shutdown, shutdown_signal) = watch::channel(false);
        let health = Arc::new(SessionHealth {
            closed: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        });

        tokio::spawn(heartbeat(
            connection.clone(),
            health.clone(),
            shutdown_signal.clone(),
        ));

        Self {
            client,
            connection,
            target,
            retention,
            health,
            shutdown,
            shutdown_signal,
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.health.closed.load(Ordering::SeqCst) {
            Err(BrokerError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerSession for RedisSession {
    fn is_connected(&self) -> bool {
        self.health.is_usable()
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let key = stream_key(&self.target.cluster_id, subject);
        let limit = StreamMaxlen::Approx(self.retention);
        let mut con = self.connection.clone();

        con.xadd_maxlen::<_, _, _, _, ()>(key, limit, STREAM_ID_NEW, &[(STREAM_PAYLOAD_KEY, payload)])
            .await
            .map_err(|e| self.health.observe(e))
    }

    async fn queue_subscribe(
        &self,
        request: QueueSubscribeRequest,
        handler: MessageHandler,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError> {
        self.ensure_open()?;

        let key = stream_key(&self.target.cluster_id, &request.subject);
        let group = request.durable_name.clone();
        let mut con = self.connection.clone();

        // Create the group if it does not exist, an existing one resumes where it left off
        if let Err(error) = con
            .xgroup_create_mkstream::<_, _, _, ()>(&key, &group, STREAM_ID_TAIL)
            .await
        {
            if error.code() != Some(ERROR_CODE_GROUP_EXISTS) {
                return Err(self.health.observe(error));
            }
        }

        // Blocking reads require a connection of their own
        let reader = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| self.health.observe(e))?;

        let (stop, stop_signal) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));

        let consumer = RedisConsumer {
            acknowledger: self.connection.clone(),
            key: key.clone(),
            group: group.clone(),
            consumer: self.target.client_id.clone(),
            subject: request.subject.clone(),
            ack_wait: request.ack_wait,
            max_inflight: request.max_inflight.max(1),
            handler,
            health: self.health.clone(),
            active: active.clone(),
        };

        tokio::spawn(consumer.run(reader, stop_signal, self.shutdown_signal.clone()));

        info!(%key, %group, queue_group = %request.queue_group, "Subscribed to stream");

        Ok(Box::new(RedisSubscription::new(
            self.connection.clone(),
            key,
            group,
            stop,
            active,
        )))
    }

    async fn remove_durable(&self, subject: &str, durable_name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let key = stream_key(&self.target.cluster_id, subject);
        let mut con = self.connection.clone();

        con.xgroup_destroy::<_, _, ()>(&key, durable_name)
            .await
            .map_err(|e| self.health.observe(e))?;

        debug!(%key, group = %durable_name, "Removed consumer group");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.health.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }

        self.shutdown.send(true).ok();
        debug!(cluster_id = %self.target.cluster_id, "Closed redis session");

        Ok(())
    }
}

async fn heartbeat(
    mut connection: MultiplexedConnection,
    health: Arc<SessionHealth>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticks.tick() => {
                if let Err(error) = redis::cmd("PING").query_async::<_, ()>(&mut connection).await {
                    if is_connection_error(&error) {
                        health.mark_unhealthy();
                        break;
                    }

                    debug!(%error, "Heartbeat failed");
                }
            }
        }
    }
}
