use crate::library::communication::{BrokerError, BrokerMessage};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

/// Stream entry delivered to a consumer group member
pub(super) struct RedisMessage {
    con: MultiplexedConnection,
    key: String,
    group: String,
    id: String,
    subject: String,
    payload: Vec<u8>,
}

impl RedisMessage {
    pub(super) fn new(
        con: MultiplexedConnection,
        key: String,
        group: String,
        id: String,
        subject: String,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            con,
            key,
            group,
            id,
            subject,
            payload,
        }
    }
}

#[async_trait]
impl BrokerMessage for RedisMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn acknowledge(&mut self) -> Result<(), BrokerError> {
        self.con
            .xack::<_, _, _, ()>(&self.key, &self.group, &[&self.id])
            .await?;

        Ok(())
    }
}
