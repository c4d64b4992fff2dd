use super::client::SessionHealth;
use super::message::RedisMessage;
use super::{is_connection_error, stale_entries, STREAM_ID_ADDITIONS, STREAM_PAYLOAD_KEY};
use crate::library::communication::{BrokerError, MessageHandler, QueueSubscription};
use async_trait::async_trait;
use redis::aio::{Connection, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisResult};
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

const BLOCK_DURATION: Duration = Duration::from_secs(5);
const ERROR_DELAY: Duration = Duration::from_millis(500);
const PENDING_SCAN_LIMIT: usize = 100;

pub(super) struct RedisConsumer {
    pub(super) acknowledger: MultiplexedConnection,
    pub(super) key: String,
    pub(super) group: String,
    pub(super) consumer: String,
    pub(super) subject: String,
    pub(super) ack_wait: Duration,
    pub(super) max_inflight: usize,
    pub(super) handler: MessageHandler,
    pub(super) health: Arc<SessionHealth>,
    pub(super) active: Arc<AtomicBool>,
}

impl RedisConsumer {
    /// Consumes the stream until either the subscription or the whole session is stopped.
    /// Each iteration first reclaims entries whose ack-wait expired and then blocks for new ones.
    pub(super) async fn run(
        self,
        mut reader: Connection,
        mut stop: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_inflight));
        let block = self
            .ack_wait
            .min(BLOCK_DURATION)
            .as_millis()
            .try_into()
            .unwrap_or_default();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.max_inflight)
            .block(block);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = shutdown.changed() => break,
                result = self.poll(&mut reader, &options, &semaphore) => {
                    match result {
                        Ok(_) => {}
                        Err(error) if is_connection_error(&error) => {
                            warn!(key = %self.key, %error, "Consumer lost its connection");
                            self.health.mark_unhealthy();
                            break;
                        }
                        Err(error) => {
                            warn!(key = %self.key, %error, "Failed to read from stream");
                            sleep(ERROR_DELAY).await;
                        }
                    }
                }
            }
        }

        self.active.store(false, Ordering::SeqCst);
        debug!(key = %self.key, group = %self.group, "Consumer stopped");
    }

    async fn poll(
        &self,
        reader: &mut Connection,
        options: &StreamReadOptions,
        semaphore: &Arc<Semaphore>,
    ) -> RedisResult<()> {
        let mut con = self.acknowledger.clone();

        let pending: StreamPendingCountReply = con
            .xpending_count(&self.key, &self.group, "-", "+", PENDING_SCAN_LIMIT)
            .await?;
        let stale = stale_entries(
            pending
                .ids
                .iter()
                .map(|entry| (entry.id.as_str(), entry.last_delivered_ms)),
            self.ack_wait,
        );

        if !stale.is_empty() {
            let min_idle: usize = self.ack_wait.as_millis().try_into().unwrap_or(usize::MAX);
            let claimed: StreamClaimReply = con
                .xclaim(&self.key, &self.group, &self.consumer, min_idle, &stale[..])
                .await?;

            trace!(key = %self.key, count = claimed.ids.len(), "Redelivering expired entries");

            for entry in claimed.ids {
                self.dispatch(entry, semaphore).await;
            }
        }

        let reply: Option<StreamReadReply> = reader
            .xread_options(&[&self.key], &[STREAM_ID_ADDITIONS], options)
            .await?;

        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                self.dispatch(entry, semaphore).await;
            }
        }

        Ok(())
    }

    /// Hands the entry to the handler on a task of its own once an inflight slot is available
    async fn dispatch(&self, entry: StreamId, semaphore: &Arc<Semaphore>) {
        let payload: Vec<u8> = match entry.get(STREAM_PAYLOAD_KEY) {
            Some(payload) => payload,
            None => {
                warn!(key = %self.key, id = %entry.id, "Discarding entry without payload");
                let mut con = self.acknowledger.clone();
                con.xack::<_, _, _, ()>(&self.key, &self.group, &[&entry.id])
                    .await
                    .ok();
                return;
            }
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let message = RedisMessage::new(
            self.acknowledger.clone(),
            self.key.clone(),
            self.group.clone(),
            entry.id,
            self.subject.clone(),
            payload,
        );
        let handler = self.handler.clone();

        tokio::spawn(async move {
            handler(Box::new(message)).await;
            drop(permit);
        });
    }
}

/// Handle to a consumer group subscription
pub(super) struct RedisSubscription {
    connection: MultiplexedConnection,
    key: String,
    group: String,
    stop: watch::Sender<bool>,
    active: Arc<AtomicBool>,
}

impl RedisSubscription {
    pub(super) fn new(
        connection: MultiplexedConnection,
        key: String,
        group: String,
        stop: watch::Sender<bool>,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connection,
            key,
            group,
            stop,
            active,
        }
    }

    fn halt(&self) -> bool {
        self.stop.send(true).ok();
        self.active.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueSubscription for RedisSubscription {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.halt();

        let mut con = self.connection.clone();
        con.xgroup_destroy::<_, _, ()>(&self.key, &self.group)
            .await?;

        debug!(key = %self.key, group = %self.group, "Removed consumer group");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.halt() {
            Ok(())
        } else {
            Err(BrokerError::SubscriptionClosed)
        }
    }
}
